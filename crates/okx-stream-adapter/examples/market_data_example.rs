/*
[INPUT]:  Public endpoint, instrument id
[OUTPUT]: Live order book tops and ticker pushes on stdout
[POS]:    Examples - public market data stream
[UPDATE]: When subscription or book callback API changes
*/

use okx_stream_adapter::*;
use serde_json::Value;
use tokio::time::{Duration, sleep};

/// Example: stream the BTC-USDT order book and ticker for 30 seconds
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== OKX Market Data Example ===\n");

    let client = WsClient::new(StreamConfig::new(Endpoint::Public))?;

    client.on_book(Channel::Books, |event| {
        let book = event.book;
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            println!(
                "[{}] seq={} bid {}@{} ask {}@{}",
                book.inst_id, book.sequence_id, bid.size, bid.price, ask.size, ask.price
            );
        }
    })?;
    client.on_channel::<Value, _>(Channel::Tickers, |event| {
        for ticker in event.data {
            println!("ticker {} last={}", ticker["instId"], ticker["last"]);
        }
    });
    client.on_error(|err| eprintln!("stream error: {err}"));

    client.start()?;
    let ack = client
        .subscribe_and_wait(SubscriptionArg::instrument(Channel::Books, "BTC-USDT"))
        .await?;
    println!("✓ subscribed: {:?}", ack.arg);
    client
        .subscribe(&[SubscriptionArg::instrument(Channel::Tickers, "BTC-USDT")])
        .await?;

    sleep(Duration::from_secs(30)).await;

    client.close().await;
    println!("\n✓ Market data example complete");
    Ok(())
}
