use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives an io_uring instance through one scenario")]
pub struct Args {
    /// Submission queue capacity of the ring under test.
    #[arg(short, long, default_value_t = 8)]
    pub entries: u32,

    #[command(subcommand)]
    pub scenario: Scenario,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Scenario {
    /// Submit NOPs in one batch and reap their completions.
    Nop {
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
    /// Write text to a fresh scratch file at offset 0.
    Write {
        #[arg(short, long, default_value = "hello world")]
        text: String,
    },
    /// Read a scratch file back through block-aligned iovecs.
    Readv {
        #[arg(short, long, default_value = "Hello, IO_URING!\n")]
        text: String,
    },
    /// Run two full rounds of NOPs so SQ slots are reused.
    Wrap,
    /// Publish a slot naming a non-existent SQE and check it is dropped.
    Dropped,
}
