use colored::Colorize;

fn main() {
    if let Err(e) = fleetgate::run() {
        eprintln!("{} [{}] {}", "error:".red().bold(), e.code(), e);
        std::process::exit(1);
    }
}
