mod client;
mod wire;

pub use client::{
    ClientOptions, NemoRetrieverClient, BBOX_TOOL, DEFAULT_ASSETS_URL, DEFAULT_INVOKE_URL,
    DEFAULT_MODEL,
};
