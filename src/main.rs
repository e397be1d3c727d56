use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rtp_signaling_client::calls::{CallSession, RtpPlan, WebRtcEngine, WebRtcEngineConfig};
use rtp_signaling_client::config::{ClientConfig, Role, VideoCodec};
use rtp_signaling_client::transport::{
    DEFAULT_URL, TlsOptions, TokioWebSocketTransportFactory, TransportFactory,
};

// One side of a one-to-one RTP call set up through a WebSocket signaling server.
//
// Usage:
//   cargo run -- caller --file clip.ivf                         # call test2 as test1
//   cargo run -- callee --user test2 --file out.ivf             # wait for a call
//   cargo run -- caller --url wss://10.0.0.1:8443/one2one --insecure --file clip.h264

#[derive(Parser, Debug)]
#[command(name = "rtp-client", version, about)]
struct Cli {
    /// Which side of the call to play
    #[arg(value_enum)]
    role: Role,

    /// Signaling server URL
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// User name registered with the signaling server
    #[arg(long, default_value = "test1")]
    user: String,

    /// Peer name to call
    #[arg(long, default_value = "test2")]
    peer: String,

    /// Caller: media file to send. Callee: media file to write. The
    /// extension (h264/mkv or vp8/ivf) selects the codec.
    #[arg(long)]
    file: PathBuf,

    /// Only generate local ICE candidates on this address
    #[arg(long)]
    ice_addr: Option<IpAddr>,

    /// Accept any server certificate (self-signed lab servers)
    #[arg(long)]
    insecure: bool,

    /// Debug the TLS connection by dumping its secrets to the key log file
    #[arg(long)]
    debug: bool,

    #[arg(long, default_value = "/tmp/keylog")]
    keylog_file: PathBuf,
}

impl Cli {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            role: self.role,
            url: self.url,
            user: self.user,
            peer: self.peer,
            file: self.file,
            ice_addr: self.ice_addr,
            tls: TlsOptions {
                insecure_skip_verify: self.insecure,
                key_log_path: self.debug.then_some(self.keylog_file),
            },
        }
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = cli.into_config();
    let codec = match config.validate() {
        Ok(codec) => codec,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(config, codec)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig, codec: VideoCodec) -> Result<(), anyhow::Error> {
    info!(
        "Starting {}: user={}, peer={}: video: {} ({codec})",
        config.role,
        config.user,
        config.peer,
        config.file.display()
    );

    let factory = TokioWebSocketTransportFactory::new(config.url.clone(), config.tls.clone());
    info!("Connecting to {}", factory.url());
    let (transport, transport_events) = factory.create_transport().await?;

    let (engine, engine_events) = WebRtcEngine::new(WebRtcEngineConfig {
        codec,
        ice_addr: config.ice_addr,
    })
    .await?;

    let mut session = CallSession::start(
        config.session_params(),
        Arc::new(engine),
        engine_events,
        transport,
        transport_events,
    );

    let result = async {
        let call = session.negotiate().await?;
        let plan = RtpPlan::resolve(&call, codec)?;
        info!("Media hand-off for {}: {plan}", config.file.display());
        session.run_until_shutdown(shutdown_signal()).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    session.close().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
