use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use tally_config::Config;

const HEALTHY: &str = "health: up";

/// Sends the `health` command to the admin channel at `addr` and checks the reply.
pub fn check_health(addr: SocketAddr, timeout: Duration) -> Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout)
        .with_context(|| format!("could not connect to tally at {addr}"))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    stream.write_all(b"health\n")?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut body = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            bail!("connection closed before the end of the response");
        }

        match line.trim_end() {
            "END" => break,
            line => body.push(line.to_owned()),
        }
    }

    // The server closes the connection on its own after the read timeout.
    stream.write_all(b"quit\n").ok();

    if body != [HEALTHY] {
        bail!("tally is unhealthy: {}", body.join(" "));
    }

    Ok(())
}

pub fn healthcheck(config: &Config, matches: &ArgMatches) -> Result<()> {
    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(5);

    let addr = matches
        .get_one::<SocketAddr>("addr")
        .copied()
        .unwrap_or_else(|| config.admin_addr());

    match check_health(addr, Duration::from_secs(timeout)) {
        Ok(()) => {
            tally_log::info!("tally at {addr} is healthy");
            Ok(())
        }
        Err(err) => {
            tally_log::error!("tally is unhealthy. Error: {err:#}");
            Err(err)
        }
    }
}
