use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status} after {attempts} attempts")]
    Exhausted {
        url: String,
        status: u16,
        attempts: u32,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("price {0:?} has a single bound but no \"do\"/\"nad\" prefix")]
    SingleBound(String),
    #[error("price {0:?} contains no numbers")]
    Missing(String),
    #[error("price {0:?} does not fit into an integer")]
    Number(String),
}
