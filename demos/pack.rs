use std::env;
use std::io::Cursor;

use nitrofs::{HostDir, NitroFs, Result};

fn main() -> Result<()> {
    let dir = env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let mut image = Cursor::new(Vec::new());
    let info = nitrofs::build(&mut image, &HostDir::new(&dir))?;
    println!("{info:#?}");

    let fs = NitroFs::new(image.into_inner(), info);
    for region in fs.regions()? {
        println!(
            "{:08X}..{:08X}  {}",
            region.offset,
            region.end(),
            region.kind
        );
    }

    Ok(())
}
