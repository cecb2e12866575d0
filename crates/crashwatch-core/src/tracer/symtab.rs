//! Function symbol tables of loaded images.
//!
//! `dladdr` only sees exported symbols and debug info only knows the address
//! being looked up, so neither says where the enclosing function starts. The
//! image's own symbol table does: it is read once per image with `object`
//! and kept for later traces.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};

use object::{BinaryFormat, Object, ObjectSegment, ObjectSymbol, SymbolKind};
use once_cell::sync::Lazy;

use super::demangle::display_symbol;

/// Alignment the loader rounds an ELF image's first segment down to.
const ELF_PAGE_MASK: u64 = !0xfff;

static IMAGES: Lazy<Mutex<HashMap<PathBuf, Option<Arc<ImageSymbols>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionSymbol
{
    start: u64,
    /// Zero when the format does not record sizes
    size: u64,
    name: String,
}

/// Function symbols of one image, sorted by link-time start address.
#[derive(Debug, Default)]
pub(crate) struct ImageSymbols
{
    /// Link-time address of the byte the loader reports as the image base
    link_base: u64,
    symbols: Vec<FunctionSymbol>,
}

impl ImageSymbols
{
    /// Read the function symbols out of an image file.
    ///
    /// Returns `None` for data `object` cannot parse.
    pub(crate) fn parse(data: &[u8]) -> Option<Self>
    {
        let file = object::File::parse(data).ok()?;
        let format = file.format();

        let link_base = file
            .segments()
            .find(|segment| {
                let (offset, size) = segment.file_range();
                offset == 0 && size > 0
            })
            .map_or(0, |segment| match format {
                BinaryFormat::Elf => segment.address() & ELF_PAGE_MASK,
                _ => segment.address(),
            });

        let mut symbols: Vec<FunctionSymbol> = file
            .symbols()
            .chain(file.dynamic_symbols())
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition() && symbol.address() != 0)
            .filter_map(|symbol| {
                let raw = symbol.name().ok()?;
                // Mach-O prefixes every C-level name with an underscore
                let raw = match format {
                    BinaryFormat::MachO => raw.strip_prefix('_').unwrap_or(raw),
                    _ => raw,
                };
                if raw.is_empty() {
                    return None;
                }
                Some(FunctionSymbol {
                    start: symbol.address(),
                    size: symbol.size(),
                    name: display_symbol(raw),
                })
            })
            .collect();

        symbols.sort_by(|a, b| a.start.cmp(&b.start).then(b.size.cmp(&a.size)));
        symbols.dedup_by_key(|symbol| symbol.start);

        Some(Self { link_base, symbols })
    }

    /// The function containing the byte `image_offset` past the image base,
    /// with that byte's offset into it.
    pub(crate) fn lookup(&self, image_offset: u64) -> Option<(&str, u64)>
    {
        let address = self.link_base.checked_add(image_offset)?;
        let index = self.symbols.partition_point(|symbol| symbol.start <= address).checked_sub(1)?;
        let symbol = &self.symbols[index];
        let offset = address - symbol.start;
        if symbol.size != 0 && offset >= symbol.size {
            return None;
        }
        Some((&symbol.name, offset))
    }
}

/// Symbols of the image at `path`, loading and caching them on first use.
///
/// Never waits on the cache lock: when another thread holds it the image is
/// read without caching.
pub(crate) fn image_symbols(path: &Path) -> Option<Arc<ImageSymbols>>
{
    let mut images = match IMAGES.try_lock() {
        Ok(images) => images,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return load(path).map(Arc::new),
    };

    if let Some(cached) = images.get(path) {
        return cached.clone();
    }
    let loaded = load(path).map(Arc::new);
    images.insert(path.to_path_buf(), loaded.clone());
    loaded
}

fn load(path: &Path) -> Option<ImageSymbols>
{
    match fs::read(path) {
        Ok(data) => ImageSymbols::parse(&data),
        // The loader may report the main executable by the name it was
        // started with rather than a path that resolves from here.
        Err(_) => {
            let exe = std::env::current_exe().ok()?;
            if exe.file_name() != path.file_name() {
                return None;
            }
            ImageSymbols::parse(&fs::read(exe).ok()?)
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn table(link_base: u64, symbols: &[(u64, u64, &str)]) -> ImageSymbols
    {
        ImageSymbols {
            link_base,
            symbols: symbols
                .iter()
                .map(|&(start, size, name)| FunctionSymbol {
                    start,
                    size,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_lookup_finds_containing_function()
    {
        let symbols = table(0, &[(0x1000, 0x40, "app::first"), (0x1040, 0x100, "app::second")]);
        assert_eq!(symbols.lookup(0x1000), Some(("app::first", 0)));
        assert_eq!(symbols.lookup(0x103f), Some(("app::first", 0x3f)));
        assert_eq!(symbols.lookup(0x1050), Some(("app::second", 0x10)));
    }

    #[test]
    fn test_lookup_rejects_gaps_and_addresses_before_first_symbol()
    {
        let symbols = table(0, &[(0x1000, 0x10, "app::first"), (0x2000, 0x10, "app::second")]);
        assert_eq!(symbols.lookup(0x0fff), None);
        assert_eq!(symbols.lookup(0x1010), None);
    }

    #[test]
    fn test_lookup_applies_link_base()
    {
        let symbols = table(0x400000, &[(0x401000, 0x20, "main")]);
        assert_eq!(symbols.lookup(0x1004), Some(("main", 4)));
    }

    #[test]
    fn test_unsized_symbol_extends_to_next()
    {
        let symbols = table(0, &[(0x1000, 0, "_start"), (0x2000, 0x10, "main")]);
        assert_eq!(symbols.lookup(0x1800), Some(("_start", 0x800)));
    }

    #[test]
    fn test_current_executable_has_function_symbols()
    {
        let exe = std::env::current_exe().unwrap();
        let symbols = image_symbols(&exe).expect("test binary should parse");
        assert!(!symbols.symbols.is_empty());
        assert!(symbols.symbols.windows(2).all(|pair| pair[0].start < pair[1].start));
    }

    #[test]
    fn test_unparseable_image_is_none()
    {
        assert!(ImageSymbols::parse(b"not an object file").is_none());
    }
}
