use countyview::CountyViewError;

#[derive(thiserror::Error, Debug)]
pub enum CountyViewCliError {
    #[error("countyview error: {0}")]
    CountyView(#[from] CountyViewError),
    #[error("invalid county label '{0}': expected \"County Name, State Name\"")]
    InvalidCountyLabel(String),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type CountyViewCliResult<T> = Result<T, CountyViewCliError>;
