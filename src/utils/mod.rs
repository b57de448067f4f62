pub mod json;
pub mod text_enum;
pub mod validate;
