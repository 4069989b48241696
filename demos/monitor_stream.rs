use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stream_monitor::stream::proto::{AlgorithmStatusPacket, LiveNodePacket, OrderEventPacket};
use stream_monitor::{
    LogItemKind, ResultContext, SessionHandler, SessionState, StreamSession,
    StreamSessionParameters,
};
use tracing_subscriber::EnvFilter;

struct PrintHandler;

impl SessionHandler for PrintHandler {
    fn handle_algorithm_status(&self, packet: AlgorithmStatusPacket) {
        println!("status algorithm={} status={:?}", packet.algorithm_id, packet.status);
    }

    fn handle_live_node(&self, packet: LiveNodePacket) {
        println!("live node deploy_id={}", packet.deploy_id);
    }

    fn handle_result(&self, context: ResultContext) {
        match context.progress {
            Some(progress) => println!(
                "backtest result session={} progress={:.0}% charts={}",
                context.name,
                progress * 100.0,
                context.result.charts.len()
            ),
            None => println!(
                "live result session={} charts={}",
                context.name,
                context.result.charts.len()
            ),
        }
    }

    fn handle_log_message(&self, timestamp: DateTime<Utc>, message: String, kind: LogItemKind) {
        println!("{} [{kind:?}] {message}", timestamp.format("%H:%M:%S%.3f"));
    }

    fn handle_order_event(&self, packet: OrderEventPacket) {
        let event = packet.event;
        println!(
            "order id={} symbol={} status={:?} fill={}@{}",
            event.order_id, event.symbol, event.status, event.fill_quantity, event.fill_price
        );
    }

    fn handle_state_changed(&self, state: SessionState) {
        println!("session state={state:?}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let parameters = StreamSessionParameters::new("localhost", "33333")
        .with_close_after_completed(true);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = StreamSession::new(parameters, Arc::new(PrintHandler))?;
        session.subscribe()?;
        println!("monitoring {}; press ctrl-c to stop", session.name());

        tokio::signal::ctrl_c().await?;
        session.shutdown();

        Ok::<(), Box<dyn Error>>(())
    })
}
