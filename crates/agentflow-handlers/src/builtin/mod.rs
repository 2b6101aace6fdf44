pub mod condition;
pub mod passthrough;
pub mod url_scraper;
pub mod wait;

pub use condition::ConditionHandler;
pub use passthrough::PassthroughHandler;
pub use url_scraper::UrlScraperHandler;
pub use wait::WaitHandler;
