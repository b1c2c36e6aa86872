// src/lib.rs

#![doc = r#"
# tplive

tplive renders one template file, serves it over HTTP and pushes a fresh
rendering to every open browser tab whenever the template directory or the
template's input data changes.

## Modules

- [`config`]: Configuration loading and merging from CLI, file, and environment.
- [`data`]: The shared render context (the JSON object fed to the template).
- [`broadcast`]: Registry of connected clients and the non-blocking fan-out.
- [`watcher`]: File system watcher for the template directory.
- [`render`]: Template rendering, error documents and live-reload patching.
- [`web`]: HTTP server with the index, event stream and data endpoints.
- [`error`]: Error types shared by the modules above.
"#]

pub mod broadcast;
pub mod config;
pub mod data;
pub mod error;
pub mod render;
pub mod watcher;
pub mod web;
