pub mod fixed_buffer;
pub mod staging;
