use anyhow::Result;

fn main() -> Result<()> {
    loadgen::cli::execute()
}
