//! Send one message over a TLS connection and tear it down.
//!
//! Usage:
//!
//! ```text
//! RUST_LOG=secure_channel=debug cargo run --example send_message -- \
//!     "tls://scanner.local:9390?cacert=/etc/scanner/ca.pem" "<get_version/>"
//! ```
//!
//! With a third argument the message is treated as a template whose `{}`
//! is replaced by that argument, markup-escaped.

use secure_channel::markup::Escaped;
use secure_channel::{ConnectionInfo, SendOutcome};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(url), Some(message)) = (args.next(), args.next()) else {
        eprintln!("usage: send_message <tls://host[:port][?params]> <message> [argument]");
        std::process::exit(2);
    };
    let argument = args.next();

    let info = ConnectionInfo::parse(&url)?;
    let mut conn = info.open()?;
    println!(
        "connected to {}:{} ({})",
        info.host,
        info.port,
        conn.session().protocol_version().unwrap_or_default()
    );

    let outcome = match argument {
        Some(value) => match message.split_once("{}") {
            Some((head, tail)) => {
                conn.send_fmt(format_args!("{}{}{}", head, Escaped(&value), tail))?
            }
            None => conn.send_str(&message)?,
        },
        None => conn.send_str(&message)?,
    };

    match outcome {
        SendOutcome::Sent => println!("message sent"),
        SendOutcome::PeerClosed => println!("peer closed the connection"),
    }

    conn.free()?;
    Ok(())
}
