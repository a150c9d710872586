use std::env;

use em4_modbus::{
    config::ClientConfig,
    error::Error,
    evse::Em4Client,
};
use inquire::{CustomType, Select, Text};

const READ_METRICS: &str = "Read metrics";
const SET_ICMAX: &str = "Set Icmax";
const PAUSE: &str = "Pause charging";
const CHANGE_OUTLET: &str = "Change outlet";
const CHANGE_HOST: &str = "Change IP address";
const QUIT: &str = "Quit";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Configuration file from the first argument, factory defaults otherwise.
    let config = match env::args().nth(1) {
        Some(path) => ClientConfig::load(&path).expect("Failed to load configuration"),
        None => ClientConfig::default(),
    };
    let mut outlet = config.default_outlet;

    println!("Using eM4 at {}", config.device);
    let mut client = Em4Client::connect(config).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    loop {
        let options = vec![READ_METRICS, SET_ICMAX, PAUSE, CHANGE_OUTLET, CHANGE_HOST, QUIT];
        let Ok(choice) = Select::new(&format!("Outlet {outlet}:"), options).prompt() else {
            break;
        };

        let result = match choice {
            READ_METRICS => client.read_all(outlet).map(|readings| {
                for reading in readings {
                    println!("  {reading}");
                }
            }),
            SET_ICMAX => match CustomType::<f64>::new("New Icmax in A:").prompt() {
                Ok(amps) => client
                    .set_icmax(outlet, amps)
                    .map(|confirmed| println!("Icmax is now {confirmed} A")),
                Err(_) => Ok(()),
            },
            PAUSE => client
                .pause_charging(outlet)
                .map(|()| println!("Charging paused")),
            CHANGE_OUTLET => {
                if let Ok(next) = CustomType::<u16>::new("Outlet number:").prompt() {
                    outlet = next;
                }
                Ok(())
            }
            CHANGE_HOST => match Text::new("IP address:").prompt() {
                Ok(host) => {
                    let target = client.target().with_host(host.trim());
                    client.reconnect(target)
                }
                Err(_) => Ok(()),
            },
            _ => break,
        };

        match result {
            Ok(()) => {}
            Err(e @ Error::Connection { .. }) => {
                eprintln!("{e}");
                // Try once to get back to the device before the next command.
                if let Err(e) = client.open() {
                    eprintln!("Reconnect failed: {e}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    client.close();
}
