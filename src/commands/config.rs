use assistant_runtime::Config;
use clap::ArgMatches;
use std::path::PathBuf;

pub async fn print(matches: &ArgMatches) {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    match Config::load(config_path.as_deref()) {
        Ok(config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("failed to render configuration: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}
