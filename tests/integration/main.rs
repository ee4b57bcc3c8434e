mod common;
mod crawl;
mod import;
mod migrations;
mod supervisor;
