//! Packs `bundle/bits32` and `bundle/bits64` into the zip archives that the
//! isolated module loader embeds with `include_bytes!`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;

const BUNDLES: &[(&str, &str)] = &[
    ("bundle/bits32", "bridge32.zip"),
    ("bundle/bits64", "bridge64.zip"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = env::var("OUT_DIR")?;

    for (source_dir, archive_name) in BUNDLES {
        println!("cargo:rerun-if-changed={}", source_dir);

        let archive = fs::File::create(Path::new(&out_dir).join(archive_name))?;
        let mut zip = zip::ZipWriter::new(archive);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        // Sorted so the archive bytes are reproducible across builds
        let mut entries = fs::read_dir(source_dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(entry.path())?)?;
        }

        zip.finish()?;
    }

    Ok(())
}
