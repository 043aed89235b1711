use std::env;
use std::process::exit;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    exit(amorph_cli::run_from_args(env::args().skip(1).collect()));
}
