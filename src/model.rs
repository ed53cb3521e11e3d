pub mod avatar;
pub mod tracking_data;
pub mod viseme;

pub use avatar::*;
pub use tracking_data::*;
pub use viseme::*;
