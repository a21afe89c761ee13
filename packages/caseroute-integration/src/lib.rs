mod common;
mod listing;
mod race;
mod sweep;
