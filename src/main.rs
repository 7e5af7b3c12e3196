use std::process;

use passive_tcp::log::{self, Level};
use passive_tcp::net::{self, Handle, Tun, TunTransport};
use passive_tcp::{Config, Result, Server};
use passive_tcp::{error, info, warn};

fn main() {
    let config = Config::from_args();

    if config.verbose {
        log::set_max_level(Level::Debug);
    }

    if let Err(err) = run(&config) {
        error!("{err}");
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    config.validate()?;

    let tun = Tun::open(&config.interface)?;
    info!("interface name: {}", tun.name());

    if config.ignore_checksum {
        warn!("TCP checksum validation is disabled");
    }

    let transport = TunTransport::new(tun, config.local_addr(), config.ignore_checksum);
    let mut server = Server::new(transport, config.port);

    server.set_accept_callback(|conn| {
        info!("[{}] accepted connection", conn.socket());

        conn.set_receive_callback(|conn, payload| {
            if payload.is_empty() {
                info!("[{}] peer closed, closing connection", conn.socket());

                if let Err(err) = conn.close() {
                    warn!("[{}] failed to close connection: {err}", conn.socket());
                }

                return;
            }

            info!(
                "[{}] read {} bytes from peer: {}",
                conn.socket(),
                payload.len(),
                String::from_utf8_lossy(payload).escape_default()
            );

            if let Err(err) = conn.send(payload) {
                warn!("[{}] failed to echo payload: {err}", conn.socket());
            }
        });
    });

    let handle = Handle::new()?;

    net::run(&mut server, &handle)
}
