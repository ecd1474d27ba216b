use clap::Parser;
use clap_derive::Parser;
use gmsec::config::Config;
use gmsec::connection::{Connection, REQUEST_REPUBLISH_NEVER};
use gmsec::field::{Field, FieldValue};
use gmsec::message::{Message, MessageKind};
use gmsec::status::GmsecResult;
use tracing::{error, info, Level};

/// Sends a directive request and waits for the reply. A responder task on a
/// second connection answers the request, so the round trip completes
/// in-process over the loopback middleware.
#[derive(Parser)]
struct Args {
    /// Config overrides as KEY=VALUE pairs, e.g. `mw-id=loopback`
    #[clap(value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    #[clap(long, default_value = "SAFE-MODE")]
    directive: String,

    #[clap(long, default_value_t = 5000)]
    timeout_ms: i32,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

const REQUEST_SUBJECT: &str = "C2MS.MSSN.SAT1.REQ.DIR.DEMO-RESP";
const REPLY_SUBJECT: &str = "C2MS.MSSN.SAT1.RESP.DIR.DEMO-RESP";

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

fn demo_config(args: &Args) -> Config {
    let mut config = Config::from_args([
        "mw-id=loopback".to_string(),
        "mw-server=demo-request".to_string(),
    ]);
    config.merge(&Config::from_args(args.overrides.iter().map(String::as_str)), true);
    config
}

async fn run(args: &Args) -> GmsecResult<()> {
    let responder = start_responder(&demo_config(args)).await?;

    let requester = Connection::from_config(&demo_config(args))?;
    requester.connect().await?;
    info!(mw = %requester.mw_info().await, "requester connected");

    let mut request = Message::new(REQUEST_SUBJECT, MessageKind::Request)?;
    request.add_field(Field::new(
        "DIRECTIVE-STRING",
        FieldValue::String(args.directive.clone()),
    )?);
    request.add_field(Field::new(
        "DESTINATION-COMPONENT",
        FieldValue::String("DEMO-RESP".to_string()),
    )?);

    let reply = requester
        .request(&mut request, args.timeout_ms, REQUEST_REPUBLISH_NEVER)
        .await?;
    info!(
        subject = reply.subject(),
        response_status = reply.get_i64_value("RESPONSE-STATUS")?,
        "received reply"
    );

    requester.disconnect().await?;
    responder.await.map_err(|e| {
        gmsec::status::Status::new(
            gmsec::status::StatusClass::Other,
            gmsec::status::StatusCode::OtherError,
            format!("responder task failed: {}", e),
        )
    })??;
    Ok(())
}

/// Answers the first directive request with a successful-completion reply.
async fn start_responder(
    config: &Config,
) -> GmsecResult<tokio::task::JoinHandle<GmsecResult<()>>> {
    let conn = Connection::from_config(config)?;
    conn.connect().await?;
    conn.subscribe(REQUEST_SUBJECT).await?;

    Ok(tokio::spawn(async move {
        let request = match conn.receive(10_000).await? {
            Some(msg) => msg,
            None => {
                error!("no request arrived at the responder");
                return conn.disconnect().await;
            }
        };
        let directive = request.get_string_value("DIRECTIVE-STRING")?;
        info!(directive = %directive, "responder received directive");

        let mut reply = Message::new(REPLY_SUBJECT, MessageKind::Reply)?;
        reply.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(3))?);
        conn.reply(&request, &mut reply).await?;
        conn.disconnect().await
    }))
}
