use rust_embed::RustEmbed;

/// The compiled admin frontend, read from `ui/dist`.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/ui/dist/"]
pub struct Assets;
