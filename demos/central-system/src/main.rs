use chargewire::prelude::*;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "central-system")]
#[command(about = "Minimal OCPP central system built on chargewire")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: String,

    /// Require this Basic auth password from every charge point
    #[arg(long)]
    password: Option<String>,

    /// Heartbeat interval handed out in BootNotification responses, seconds
    #[arg(long, default_value_t = 300)]
    heartbeat_interval: u64,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

struct SharedPassword(Option<Vec<u8>>);

impl Authenticator for SharedPassword {
    async fn authenticate(
        &self,
        responder: HandshakeResponder,
        handshake: Arc<HandshakeContext>,
        _cancel: CancellationToken,
    ) {
        match &self.0 {
            Some(expected) if handshake.password.as_ref() != Some(expected) => {
                tracing::warn!(identity = %handshake.identity, "bad credentials");
                responder.reject(401, "bad credentials");
            }
            _ => {
                responder.accept(Acceptance::default());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message handling
// ---------------------------------------------------------------------------

struct Central {
    heartbeat_interval: u64,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ServerObserver for Central {
    fn on_client_connected(&self, session: &Session) {
        let identity = session.identity().to_owned();
        let interval = self.heartbeat_interval;

        {
            let identity = identity.clone();
            session.handle_method("BootNotification", move |call: InboundCall| {
                tracing::info!(%identity, params = %call.params, "boot notification");
                async move {
                    Ok(json!({
                        "status": "Accepted",
                        "currentTime": now(),
                        "interval": interval,
                    }))
                }
            });
        }

        session.handle_method("Heartbeat", |_call| async {
            Ok(json!({ "currentTime": now() }))
        });

        {
            let identity = identity.clone();
            session.handle_method("StatusNotification", move |call: InboundCall| {
                tracing::info!(%identity, params = %call.params, "status notification");
                async { Ok(json!({})) }
            });
        }

        session.handle(move |call: InboundCall| {
            tracing::info!(
                %identity,
                method = %call.method,
                params = %call.params,
                "unhandled call"
            );
            async move { Err(RpcError::not_implemented(&call.method)) }
        });
    }

    fn on_client_closed(&self, session: &Session, info: &CloseInfo) {
        tracing::info!(
            identity = %session.identity(),
            code = info.code,
            reason = %info.reason,
            "charge point left"
        );
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn build_server(
    bind: &str,
    password: Option<String>,
    heartbeat_interval: u64,
) -> Result<RpcServer<SharedPassword>, ChargewireError> {
    RpcServer::builder()
        .bind(bind)
        .protocols(["ocpp2.0.1", "ocpp1.6"])
        .observer(Central { heartbeat_interval })
        .build(SharedPassword(password.map(String::into_bytes)))
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "central_system=debug,chargewire=debug,chargewire_session=debug,info"
    } else {
        "central_system=info,chargewire=info,chargewire_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let server =
        build_server(&args.bind, args.password, args.heartbeat_interval).await?;
    tracing::info!(addr = %server.local_addr()?, "central system listening");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}
