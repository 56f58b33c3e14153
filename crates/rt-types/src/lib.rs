pub mod batch;
pub mod errors;
pub mod loss;
pub mod params;
pub mod ranker;

pub use batch::*;
pub use errors::*;
pub use loss::*;
pub use params::*;
pub use ranker::*;
