mod rss;

pub use rss::RssSource;
