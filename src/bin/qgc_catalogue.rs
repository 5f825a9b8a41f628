//! Check a message catalogue and list what it declares.
//!
//! Usage:
//!   qgc_catalogue [--identities] [--layouts] [FILE]
//!
//! Without FILE the built-in catalogue is listed. Exits non-zero if the catalogue does
//! not parse or resolve.

use qgcproto::schema;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut take = |flag: &str| match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    };
    let only_ids = take("--identities");
    let only_layouts = take("--layouts");
    let (show_ids, show_layouts) = match (only_ids, only_layouts) {
        (false, false) => (true, true),
        flags => flags,
    };

    let (label, source) = match args.first() {
        Some(path) => (path.clone(), std::fs::read_to_string(path)?),
        None => ("built-in catalogue".to_string(), schema::BUILTIN_SOURCE.to_string()),
    };
    let catalogue = match schema::load(&source) {
        Ok(cat) => cat,
        Err(e) => {
            eprintln!("{}: {}", label, e);
            std::process::exit(1);
        }
    };

    let identities = catalogue.identities();
    if show_ids {
        println!("# identities");
        for ((grp, id), name) in &identities {
            println!("{:02x} {:02x}  {}", grp, id, name);
        }
    }
    if show_layouts {
        println!("# layouts");
        for schema in catalogue.schemas() {
            let len = match schema.fixed_len() {
                Some(n) => n.to_string(),
                None => "variable".to_string(),
            };
            match &schema.variant_of {
                Some(base) => println!("{:<4} {:<16} {:>8}  (variant of {})", schema.mode, schema.name, len, base),
                None => println!("{:<4} {:<16} {:>8}", schema.mode, schema.name, len),
            }
        }
    }
    eprintln!(
        "{}: {} identities, {} layouts",
        label,
        identities.len(),
        catalogue.schemas().count()
    );
    Ok(())
}
