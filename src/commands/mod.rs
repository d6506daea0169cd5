pub mod inspect_model;
pub mod model_status;
pub mod refresh_sentiment;
pub mod run;
pub mod signals;
