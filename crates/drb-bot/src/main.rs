//! Deribit session client - entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use drb_bot::{await_response, AppConfig, Session};
use drb_core::{OptionType, OrderLabel, OrderRequest, OrderSide, OrderType};
use drb_telemetry::{metrics, TracingSink};
use drb_ws::ConnectionState;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// Deribit session client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path (can also be set via DRB_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the streaming session until Ctrl-C (default)
    Run,
    /// Place a buy order
    Buy(OrderArgs),
    /// Place a sell order
    Sell(OrderArgs),
    /// Cancel an order
    Cancel {
        #[arg(long)]
        order_id: String,
    },
    /// Change amount and price of an open order
    Edit {
        #[arg(long)]
        order_id: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        price: Decimal,
    },
    /// Request positions over the stream and print the response
    Positions {
        #[arg(long)]
        currency: String,
        /// future, option, spot, ...
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Args, Debug)]
struct OrderArgs {
    #[arg(long)]
    instrument: String,
    #[arg(long)]
    amount: Decimal,
    /// Required for limit orders
    #[arg(long)]
    price: Option<Decimal>,
    #[arg(long, default_value = "market")]
    order_type: OrderType,
    #[arg(long)]
    expiry: Option<String>,
    #[arg(long, requires = "option_type")]
    strike: Option<Decimal>,
    #[arg(long, requires = "strike")]
    option_type: Option<OptionType>,
}

impl OrderArgs {
    fn into_request(self, side: OrderSide) -> OrderRequest {
        let mut order = match (self.order_type, self.price) {
            (OrderType::Limit, Some(price)) => {
                OrderRequest::limit(self.instrument, side, self.amount, price)
            }
            (order_type, price) => OrderRequest {
                order_type,
                price,
                ..OrderRequest::market(self.instrument, side, self.amount)
            },
        };
        if let Some(expiry) = self.expiry {
            order = order.with_expiry(expiry);
        }
        if let (Some(strike), Some(option_type)) = (self.strike, self.option_type) {
            order = order.with_option(strike, option_type);
        }
        order.with_label(OrderLabel::new())
    }
}

const POSITIONS_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Must be before any WS connections
    drb_ws::init_crypto();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    drb_telemetry::init_logging(Some(&config.telemetry.log_level))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        rest_url = %config.rest_url,
        ws_url = %config.ws_url,
        "Starting drb-bot"
    );

    let credential = config.credentials.load()?;
    let session = Session::new(&config, credential, Arc::new(TracingSink::new()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, &session).await?,
        Command::Buy(args) => place(&session, args.into_request(OrderSide::Buy)).await?,
        Command::Sell(args) => place(&session, args.into_request(OrderSide::Sell)).await?,
        Command::Cancel { order_id } => {
            let ack = session.rest().cancel_order(&order_id).await?;
            println!("{}", serde_json::to_string_pretty(&ack.raw)?);
        }
        Command::Edit {
            order_id,
            amount,
            price,
        } => {
            let ack = session.rest().modify_order(&order_id, amount, price).await?;
            println!("{}", serde_json::to_string_pretty(&ack.raw)?);
        }
        Command::Positions { currency, kind } => {
            positions(&session, &currency, kind.as_deref()).await?
        }
    }

    Ok(())
}

async fn place(session: &Session, order: OrderRequest) -> Result<()> {
    let ack = session.rest().place_order(&order).await?;
    println!("{}", serde_json::to_string_pretty(&ack.raw)?);
    Ok(())
}

async fn positions(session: &Session, currency: &str, kind: Option<&str>) -> Result<()> {
    session.start();
    let state = session
        .wait_for_state(|s| matches!(s, ConnectionState::Ready | ConnectionState::GivenUp))
        .await?;
    if state == ConnectionState::GivenUp {
        session.stop().await?;
        bail!("connection gave up before positions could be requested");
    }

    let pending = session.request_positions(currency, kind).await?;
    let result = await_response(pending, POSITIONS_TIMEOUT).await;
    session.stop().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn run(config: &AppConfig, session: &Session) -> Result<()> {
    let subs = &config.subscriptions;
    session.subscribe_order_book(subs.order_book.as_slice()).await?;
    session.subscribe_tickers(subs.ticker.as_slice()).await?;
    session.start();

    if let Some(currency) = &subs.positions_currency {
        let state = session
            .wait_for_state(|s| matches!(s, ConnectionState::Ready | ConnectionState::GivenUp))
            .await?;
        if state == ConnectionState::Ready {
            // The response also reaches the sink as Positions.
            let pending = session
                .request_positions(currency, subs.positions_kind.as_deref())
                .await?;
            let currency = currency.clone();
            tokio::spawn(async move {
                match await_response(pending, POSITIONS_TIMEOUT).await {
                    Ok(positions) => info!(
                        %currency,
                        count = positions.as_array().map_or(0, Vec::len),
                        "Positions received"
                    ),
                    Err(e) => warn!(%currency, error = %e, "Positions request unanswered"),
                }
            });
        }
    }

    let mut state_rx = session.subscribe_state();
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break Ok(());
            }
            given_up = state_rx.wait_for(|s| *s == ConnectionState::GivenUp) => {
                if given_up.is_err() {
                    break Ok(());
                }
            }
        }

        let Some(delay) = config.websocket.restart_after_give_up() else {
            error!("Connection gave up, exiting");
            break Err(anyhow::anyhow!("connection gave up"));
        };
        warn!(delay_secs = delay.as_secs(), "Connection gave up, restarting after delay");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
        session.restart().await?;
    };

    session.stop().await?;
    match metrics::render() {
        Ok(text) => info!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
    outcome
}
