use std::env;

mod config;
mod probe;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let args = match probe::ProbeArgs::parse(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("tether: {}", e);
            eprint!("{}", probe::USAGE);
            std::process::exit(2);
        }
    };

    if args.help {
        print!("{}", probe::USAGE);
        return;
    }

    if let Err(e) = probe::run(args) {
        eprintln!("tether: {:#}", e);
        std::process::exit(1);
    }
}
