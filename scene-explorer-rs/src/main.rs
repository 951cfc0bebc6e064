fn main() {
    scene_explorer::cli::run();
}
