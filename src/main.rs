use std::env;
use std::path::Path;
use std::process;

use clap::{value_t_or_exit, App, Arg};
use log::{debug, error, info};

mod link;
mod mission;
mod nav_log;
mod state_machine;
mod trajectory;

#[derive(Debug)]
pub struct Config {
    host: String,
    port: u16,
    log_dir: String,
    log_file: String,
}

fn main() {
    env::set_var("RUST_LOG", "debug");
    env_logger::init();
    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("Host address of the vehicle link")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port of the vehicle link")
                .default_value("5760"),
        )
        .arg(
            Arg::with_name("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .help("Directory for the telemetry log")
                .default_value("Logs"),
        )
        .arg(
            Arg::with_name("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Telemetry log filename")
                .default_value("NavLog.txt"),
        )
        .get_matches();

    let conf = Config {
        host: matches.value_of("host").unwrap().to_string(),
        port: value_t_or_exit!(matches.value_of("port"), u16),
        log_dir: matches.value_of("log-dir").unwrap().to_string(),
        log_file: matches.value_of("log-file").unwrap().to_string(),
    };

    info!("started");
    debug!("{:?}", &conf);

    let address = format!("tcpout:{}:{}", conf.host, conf.port);
    let link = match link::MavlinkLink::connect(&address) {
        Ok(link) => link,
        Err(e) => {
            error!("unable to open vehicle link {}: {}", address, e);
            process::exit(1);
        }
    };

    let mut mission = mission::Mission::new(link);
    if let Err(e) = mission.start(Path::new(&conf.log_dir), &conf.log_file) {
        error!("mission aborted: {}", e);
        process::exit(1);
    }
    info!("mission complete");
}
