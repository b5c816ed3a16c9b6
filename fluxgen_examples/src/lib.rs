//! Runnable examples for `fluxgen_core` live in `examples/`, e.g. `cargo run --release --example flux -- --prompt "..."`.
