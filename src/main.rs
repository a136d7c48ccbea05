fn main() {
    wxprofilers::cli::run();
}
