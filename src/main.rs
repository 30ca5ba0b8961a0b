fn main() -> anyhow::Result<()> {
    backroom::run()?;
    Ok(())
}
