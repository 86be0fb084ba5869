use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    regsync::apps::run_regsync(std::env::args().skip(1))
}
