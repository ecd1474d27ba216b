use clap::Parser;
use clap_derive::Parser;
use gmsec::config::Config;
use gmsec::connection::Connection;
use gmsec::field::{Field, FieldValue};
use gmsec::message::{Message, MessageKind};
use gmsec::status::GmsecResult;
use tracing::{error, info, Level};

/// Publishes heartbeat-style messages and receives them back over a
/// subscription on the same connection.
///
/// Runs against the in-process loopback middleware unless `mw-id` is
/// overridden.
#[derive(Parser)]
struct Args {
    /// Config overrides as KEY=VALUE pairs, e.g. `mw-id=loopback`
    #[clap(value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    #[clap(long, default_value = "C2MS.MSSN.SAT1.MSG.HB.DEMO-PUB")]
    subject: String,

    /// How many messages to publish
    #[clap(long, default_value_t = 5)]
    count: u16,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    match run(&args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("demo failed: {}", e);
            std::process::exit(-1);
        }
    }
}

async fn run(args: &Args) -> GmsecResult<()> {
    let mut config = Config::from_args([
        "mw-id=loopback".to_string(),
        "mw-server=demo-publish".to_string(),
    ]);
    config.merge(&Config::from_args(args.overrides.iter().map(String::as_str)), true);

    let conn = Connection::from_config(&config)?;
    conn.connect().await?;
    info!(mw = %conn.mw_info().await, "connected");

    conn.subscribe(&args.subject).await?;

    for counter in 1..=args.count {
        let mut msg = Message::new(args.subject.as_str(), MessageKind::Publish)?;
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(1))?);
        msg.add_field(Field::new("COUNTER", FieldValue::U16(counter))?);
        conn.publish(&mut msg).await?;

        match conn.receive(1000).await? {
            Some(received) => {
                let publish_time = received.get_string_value("PUBLISH-TIME")?;
                info!(
                    subject = received.subject(),
                    counter,
                    publish_time = %publish_time,
                    "received own publication"
                );
            }
            None => error!(counter, "publication did not come back"),
        }
    }

    conn.disconnect().await
}
