mod engine_lifecycle;
mod sessions;
