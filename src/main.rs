use libavatar::{cli::Args, logger};

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(String::as_str).collect::<Vec<_>>();

    let args = match Args::parse(&args) {
        Ok(v) => v,
        Err(libavatar::cli::CliError::ParseFailure(e)) => {
            if e.status.is_ok() {
                println!("{}", e.output);
                return;
            }
            eprintln!("{}", e.output);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    logger::init(args.log_level());

    if let Err(e) = args.run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
