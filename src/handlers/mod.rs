pub mod bucket;
pub mod multipart;
pub mod object;
