fn main() {
    if let Err(err) = focusramp_lib::run() {
        eprintln!("focusramp: {err:#}");
        std::process::exit(1);
    }
}
