pub mod ffmpeg;
pub mod mimetype;
pub mod thumbnail;
