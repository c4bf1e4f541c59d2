pub mod market_data;
pub mod notification;

pub use market_data::{MarketDataGateway, MarketDataResult, MarketSnapshot};
pub use notification::NotificationSink;
