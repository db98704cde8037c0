use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    chatrelay::cli::main()
}
