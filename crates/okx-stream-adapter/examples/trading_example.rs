/*
[INPUT]:  OKX_API_KEY / OKX_SECRET_KEY / OKX_PASSPHRASE environment variables
[OUTPUT]: Order placement and cancellation over the private stream
[POS]:    Examples - demo-trading order flow
[UPDATE]: When trading operation API changes
*/

use okx_stream_adapter::*;
use rust_decimal::Decimal;

/// Example: place and cancel a far-from-market limit order on demo trading
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== OKX Trading Example ===\n");

    let (Ok(api_key), Ok(secret), Ok(passphrase)) = (
        std::env::var("OKX_API_KEY"),
        std::env::var("OKX_SECRET_KEY"),
        std::env::var("OKX_PASSPHRASE"),
    ) else {
        println!("Set OKX_API_KEY, OKX_SECRET_KEY and OKX_PASSPHRASE to run this example");
        return Ok(());
    };

    let mut config = StreamConfig::new(Endpoint::Private);
    config.demo_trading = true;
    let client = WsClient::with_credentials(config, Credentials::new(api_key, secret, passphrase))?;
    client.start()?;

    let mut state = client.connection_state();
    while *state.borrow() != ConnectionState::Streaming {
        if state.changed().await.is_err() {
            return Err(OkxError::Shutdown);
        }
    }
    println!("✓ logged in");

    let order = PlaceOrderRequest::limit(
        "BTC-USDT",
        TradeMode::Cash,
        Side::Buy,
        Decimal::new(1, 3),
        Decimal::new(1000, 0),
    )
    .with_cl_ord_id("example1");
    let ack = client.place_order(&order).await?;
    println!("✓ placed ord_id={} s_code={}", ack.ord_id, ack.s_code);

    let cancel = CancelOrderRequest::by_ord_id("BTC-USDT", ack.ord_id);
    let ack = client.cancel_order(&cancel).await?;
    println!("✓ cancelled ord_id={} s_code={}", ack.ord_id, ack.s_code);

    client.close().await;
    Ok(())
}
