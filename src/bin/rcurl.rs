use std::process;

fn main() {
    process::exit(rcurl::cli::run());
}
