//! Trading-bot style demo: broadcast a price alert on every channel, then ask a
//! question on Telegram and wait up to a minute for the answer.
//!
//! Credentials come from the usual config / env (TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID,
//! SIGNAL_PHONE_NUMBER, RESEND_API_KEY, FROM_EMAIL). Signal alerts go to
//! ALERT_SIGNAL_RECIPIENT and email alerts to ALERT_EMAIL_TO when set.
//!
//! Run with: `cargo run -p courier --example price_alert`

use courier::config;
use courier::dispatch::Dispatcher;

fn format_usd(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let whole = (cents / 100).abs().to_string();
    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, (cents % 100).abs())
}

async fn price_alert(dispatcher: &Dispatcher, symbol: &str, price: f64, change_pct: f64) {
    let message = format!("🚨 {} Alert: {} ({:+.1}%)", symbol, format_usd(price), change_pct);

    let email = dispatcher
        .send_email(
            std::env::var("ALERT_EMAIL_TO").ok().as_deref(),
            &format!("{} Price Alert", symbol),
            &format!(
                "Price Update:\n{}: {}\nChange: {:+.1}%",
                symbol,
                format_usd(price),
                change_pct
            ),
            None,
        )
        .await;
    println!("Email: {}", email.status);

    let telegram = dispatcher
        .send_with_reply("telegram", &message, None, false, 0.0)
        .await;
    println!("Telegram: {}", telegram.status);

    let signal = dispatcher
        .send_with_reply(
            "signal",
            &message,
            std::env::var("ALERT_SIGNAL_RECIPIENT").ok().as_deref(),
            false,
            0.0,
        )
        .await;
    println!("Signal: {}", signal.status);
}

async fn user_decision(dispatcher: &Dispatcher, question: &str) -> String {
    let env = dispatcher
        .send_with_reply(
            "telegram",
            &format!("🤖 Trading Decision: {}", question),
            None,
            true,
            60.0,
        )
        .await;
    env.reply_text()
        .map(String::from)
        .unwrap_or_else(|| "No response".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (config, _) = config::load_config(None)?;
    let dispatcher = Dispatcher::from_config(&config);

    println!("📊 Sending price alerts...");
    price_alert(&dispatcher, "BTC", 45_000.0, 5.2).await;

    println!("\n💭 Asking for trading decision...");
    let decision = user_decision(&dispatcher, "Should we buy more BTC at current price?").await;
    println!("User decision: {}", decision);
    Ok(())
}
