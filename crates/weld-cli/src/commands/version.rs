use miette::Result;

pub fn run() -> Result<()> {
    println!("weld {}", weld_core::VERSION);
    Ok(())
}
