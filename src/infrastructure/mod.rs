pub mod http_market_data;
pub mod telegram_sink;

pub use http_market_data::HttpMarketDataGateway;
pub use telegram_sink::{LogSink, TelegramSink};
