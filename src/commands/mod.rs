/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `serve`: Run the WebSocket server
- `classify`: Show how a command would be routed
- `projects`: List project environments

Each handler takes the loaded configuration and the subcommand's arguments,
builds what it needs from the library, and reports errors to the caller.
*/

pub mod classify;
pub mod projects;
pub mod serve;
