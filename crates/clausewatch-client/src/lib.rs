pub mod analyzer;
pub mod extractor;
pub mod html;
pub mod pdf;
pub mod transport;

pub use analyzer::HttpAnalyzer;
pub use extractor::PolicyExtractor;
pub use html::HtmlExtractor;
pub use transport::ReqwestTransport;
