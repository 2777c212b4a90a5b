//! Name-to-texture resolution with CPU-side pre-decode staging.
//!
//! The manager itself lives on the render thread. The [`TexturePreloader`]
//! half is shared with the CPU worker: it performs an independent directory
//! scan and decodes images into CPU buffers behind a mutex, so a later
//! render-thread lookup can upload without touching the disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use glow::HasContext;
use thiserror::Error;
use tracing::{debug, warn};

use crate::noise;
use crate::sampler::{
    self, parse_qualified_name, parse_random_name, FilterMode, WrapMode, DEFAULT_FILTER,
    DEFAULT_WRAP,
};
use crate::texture::Texture;

/// File extensions recognized as textures, in match order.
pub const RECOGNIZED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "dds", "png", "tga", "bmp", "dib"];

/// How many preset loads an unused texture survives before eviction.
const PURGE_AGE_THRESHOLD: u32 = 1;

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("could not open image \"{path}\": {detail}")]
    Open { path: String, detail: String },

    #[error("could not decode image \"{path}\": {detail}")]
    Decode { path: String, detail: String },
}

/// A CPU-side decoded image, ready for GPU upload.
#[derive(Clone)]
pub struct DecodedImage {
    pub width: i32,
    pub height: i32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// A texture file found during a directory scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub file_path: PathBuf,
    /// File stem, lower-cased, used for name matching.
    pub lower_base_name: String,
}

fn decode_image(path: &Path) -> Result<DecodedImage, TextureError> {
    let reader = image::io::Reader::open(path)
        .map_err(|e| TextureError::Open {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?
        .with_guessed_format()
        .map_err(|e| TextureError::Open {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let decoded = reader.decode().map_err(|e| TextureError::Decode {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;

    let rgba = decoded.to_rgba8();
    Ok(DecodedImage {
        width: rgba.width() as i32,
        height: rgba.height() as i32,
        rgba: rgba.into_raw(),
    })
}

fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            RECOGNIZED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Scans the given directories (recursively) for texture files.
pub fn scan_texture_files(paths: &[PathBuf]) -> Vec<ScannedFile> {
    let mut found = Vec::new();
    let mut stack: Vec<PathBuf> = paths.to_vec();

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if has_recognized_extension(&path) {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                found.push(ScannedFile {
                    lower_base_name: stem.to_ascii_lowercase(),
                    file_path: path,
                });
            }
        }
    }
    found
}

/// Names that never come from disk and must not be preloaded.
fn is_builtin_name(name: &str) -> bool {
    name == "main"
        || matches!(name, "blur1" | "blur2" | "blur3")
        || noise::is_noise_name(name)
        || parse_random_name(name).is_some()
}

// ---------------------------------------------------------------------------
// Thread-safe preload staging
// ---------------------------------------------------------------------------

/// The half of the texture manager the CPU worker is allowed to touch.
#[derive(Debug)]
pub struct TexturePreloader {
    search_paths: Vec<PathBuf>,
    preset_dir: Mutex<Option<PathBuf>>,
    staged: Mutex<HashMap<String, DecodedImage>>,
}

impl TexturePreloader {
    fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            preset_dir: Mutex::new(None),
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn set_preset_dir(&self, dir: Option<PathBuf>) {
        *self.preset_dir.lock().unwrap() = dir;
    }

    fn effective_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        if let Some(dir) = self.preset_dir.lock().unwrap().clone() {
            paths.push(dir);
        }
        paths
    }

    /// Scans and pre-decodes images for the given sampler names.
    ///
    /// Runs on any thread. The scan here is independent of the render
    /// thread's cached file list, so the two cannot race. Built-in names
    /// (main, blur levels, noise, randNN) are skipped.
    pub fn preload_for_samplers(&self, sampler_names: &HashSet<String>) {
        let wanted: Vec<(String, String)> = sampler_names
            .iter()
            .map(|full| {
                let (_, _, bare) = parse_qualified_name(full);
                (full.clone(), bare.to_ascii_lowercase())
            })
            .filter(|(_, bare)| !is_builtin_name(bare))
            .collect();

        if wanted.is_empty() {
            return;
        }

        let scanned = scan_texture_files(&self.effective_paths());

        for (_, bare) in wanted {
            if self.staged.lock().unwrap().contains_key(&bare) {
                continue;
            }
            let Some(file) = scanned.iter().find(|f| f.lower_base_name == bare) else {
                continue;
            };
            match decode_image(&file.file_path) {
                Ok(img) => {
                    debug!(
                        name = bare.as_str(),
                        path = %file.file_path.display(),
                        "pre-decoded texture"
                    );
                    self.staged.lock().unwrap().insert(bare, img);
                }
                Err(e) => {
                    warn!("texture pre-decode failed: {e}");
                }
            }
        }
    }

    /// Removes and returns a staged image, if one exists for `name`.
    pub fn take(&self, name: &str) -> Option<DecodedImage> {
        self.staged.lock().unwrap().remove(name)
    }

    /// Number of currently staged images.
    pub fn staged_count(&self) -> usize {
        self.staged.lock().unwrap().len()
    }
}

// ---------------------------------------------------------------------------
// Render-thread manager
// ---------------------------------------------------------------------------

/// A resolved texture binding: the texture (or the placeholder) plus the
/// sampler state the qualified name requested.
#[derive(Debug, Clone, Copy)]
pub struct TextureSamplerDescriptor {
    pub texture: Option<glow::NativeTexture>,
    pub target: u32,
    pub sampler: Option<glow::NativeSampler>,
    pub wrap: WrapMode,
    pub filter: FilterMode,
}

impl TextureSamplerDescriptor {
    fn empty() -> Self {
        Self {
            texture: None,
            target: glow::TEXTURE_2D,
            sampler: None,
            wrap: DEFAULT_WRAP,
            filter: DEFAULT_FILTER,
        }
    }
}

#[derive(Debug)]
struct UsageStats {
    /// Preset loads since this texture was last retrieved.
    age: u32,
    size_bytes: u32,
}

#[derive(Debug)]
pub struct TextureManager {
    preloader: Arc<TexturePreloader>,
    search_paths: Vec<PathBuf>,
    current_preset_dir: Option<PathBuf>,

    scanned_files: Vec<ScannedFile>,
    files_scanned: bool,

    textures: HashMap<String, Texture>,
    stats: HashMap<String, UsageStats>,
    samplers: HashMap<(WrapMode, FilterMode), glow::NativeSampler>,
    placeholder: Option<Texture>,

    rng_state: u64,
}

impl TextureManager {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            preloader: Arc::new(TexturePreloader::new(search_paths.clone())),
            search_paths,
            current_preset_dir: None,
            scanned_files: Vec::new(),
            files_scanned: false,
            textures: HashMap::new(),
            stats: HashMap::new(),
            samplers: HashMap::new(),
            placeholder: None,
            rng_state: 0x9e37_79b9_7f4a_7c15,
        }
    }

    /// Shared handle for the CPU worker.
    pub fn preloader(&self) -> Arc<TexturePreloader> {
        Arc::clone(&self.preloader)
    }

    /// Registers the directory of the preset being loaded; it is searched
    /// after the configured paths.
    pub fn set_current_preset_path(&mut self, preset_file: Option<&Path>) {
        self.current_preset_dir = preset_file
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf());
        self.preloader.set_preset_dir(self.current_preset_dir.clone());
    }

    /// Resolves a qualified name to a texture + sampler, loading from the
    /// staged pre-decode or from disk as needed. A retrieved texture's age
    /// resets to zero. Unresolvable names yield the 1x1 black placeholder.
    pub unsafe fn get_texture(
        &mut self,
        gl: &glow::Context,
        full_name: &str,
    ) -> TextureSamplerDescriptor {
        let (wrap, filter, bare) = parse_qualified_name(full_name);
        let bare = bare.to_ascii_lowercase();

        if let Some(prefix) = parse_random_name(&bare) {
            let prefix = prefix.to_string();
            return self.random_texture(gl, &prefix, wrap, filter);
        }

        let mut descriptor = TextureSamplerDescriptor {
            sampler: Some(self.sampler_for(gl, wrap, filter)),
            wrap,
            filter,
            ..TextureSamplerDescriptor::empty()
        };

        if let Some(texture) = self.lookup_or_load(gl, &bare) {
            descriptor.texture = Some(texture.handle);
            descriptor.target = texture.target;
        } else {
            let placeholder = self.placeholder(gl);
            descriptor.texture = Some(placeholder);
        }
        descriptor
    }

    /// Sampler state for a qualified name. Only analyzes the prefix; never
    /// loads a texture.
    pub unsafe fn get_sampler(
        &mut self,
        gl: &glow::Context,
        full_name: &str,
    ) -> (WrapMode, FilterMode, glow::NativeSampler) {
        let (wrap, filter, _) = parse_qualified_name(full_name);
        (wrap, filter, self.sampler_for(gl, wrap, filter))
    }

    unsafe fn lookup_or_load(&mut self, gl: &glow::Context, bare: &str) -> Option<Texture> {
        if let Some(texture) = self.textures.get(bare) {
            if let Some(stats) = self.stats.get_mut(bare) {
                stats.age = 0;
            }
            return Some(*texture);
        }

        // Built-in noise is generated, not loaded.
        if noise::is_noise_name(bare) {
            match noise::create_noise_texture(gl, bare) {
                Ok(Some(texture)) => {
                    self.textures.insert(bare.to_string(), texture);
                    return Some(texture);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("noise texture creation failed: {e}");
                    return None;
                }
            }
        }

        // CPU-worker staging first; it saves the disk round trip.
        if let Some(staged) = self.preloader.take(bare) {
            return Some(self.upload(gl, bare, &staged));
        }

        self.ensure_scanned();
        let file = self
            .scanned_files
            .iter()
            .find(|f| f.lower_base_name == bare)?
            .clone();

        match decode_image(&file.file_path) {
            Ok(img) => Some(self.upload(gl, bare, &img)),
            Err(e) => {
                warn!("texture load failed: {e}");
                None
            }
        }
    }

    unsafe fn upload(&mut self, gl: &glow::Context, name: &str, img: &DecodedImage) -> Texture {
        let mut texture = Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)
            .expect("texture allocation");
        texture.upload_rgba8(gl, img.width, img.height, &img.rgba);
        gl.bind_texture(glow::TEXTURE_2D, Some(texture.handle));
        gl.generate_mipmap(glow::TEXTURE_2D);
        gl.bind_texture(glow::TEXTURE_2D, None);

        self.textures.insert(name.to_string(), texture);
        self.stats.insert(
            name.to_string(),
            UsageStats {
                age: 0,
                size_bytes: texture.size_bytes(),
            },
        );
        debug!(
            name,
            width = img.width,
            height = img.height,
            "texture uploaded"
        );
        texture
    }

    unsafe fn random_texture(
        &mut self,
        gl: &glow::Context,
        prefix: &str,
        wrap: WrapMode,
        filter: FilterMode,
    ) -> TextureSamplerDescriptor {
        self.ensure_scanned();

        let matching: Vec<usize> = self
            .scanned_files
            .iter()
            .enumerate()
            .filter(|(_, f)| prefix.is_empty() || f.lower_base_name.starts_with(prefix))
            .map(|(i, _)| i)
            .collect();

        // If nothing matches the prefix, any scanned file wins.
        let pool_len = if matching.is_empty() {
            self.scanned_files.len()
        } else {
            matching.len()
        };

        if pool_len == 0 {
            let placeholder = self.placeholder(gl);
            return TextureSamplerDescriptor {
                texture: Some(placeholder),
                sampler: Some(self.sampler_for(gl, wrap, filter)),
                wrap,
                filter,
                ..TextureSamplerDescriptor::empty()
            };
        }

        let pick = (self.next_random() % pool_len as u64) as usize;
        let index = if matching.is_empty() {
            pick
        } else {
            matching[pick]
        };
        let name = self.scanned_files[index].lower_base_name.clone();

        let mut descriptor = TextureSamplerDescriptor {
            sampler: Some(self.sampler_for(gl, wrap, filter)),
            wrap,
            filter,
            ..TextureSamplerDescriptor::empty()
        };
        if let Some(texture) = self.lookup_or_load(gl, &name) {
            descriptor.texture = Some(texture.handle);
            descriptor.target = texture.target;
        } else {
            let placeholder = self.placeholder(gl);
            descriptor.texture = Some(placeholder);
        }
        descriptor
    }

    /// Ages every cached file texture and evicts the ones not retrieved for
    /// more than the threshold number of preset loads. Resets the scanned
    /// file list so the next lookup rescans. Call exactly once per preset
    /// load.
    pub unsafe fn purge_textures(&mut self, gl: &glow::Context) {
        let mut evicted = Vec::new();
        for (name, stats) in self.stats.iter_mut() {
            stats.age += 1;
            if stats.age > PURGE_AGE_THRESHOLD {
                evicted.push(name.clone());
            }
        }
        for name in evicted {
            if let Some(texture) = self.textures.remove(&name) {
                texture.destroy(gl);
            }
            self.stats.remove(&name);
            debug!(name = name.as_str(), "evicted unused texture");
        }

        self.files_scanned = false;
        self.scanned_files.clear();
    }

    /// Ages currently tracked by the purge logic, for tests and diagnostics.
    pub fn texture_age(&self, name: &str) -> Option<u32> {
        self.stats.get(name).map(|s| s.age)
    }

    pub fn cached_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn ensure_scanned(&mut self) {
        if self.files_scanned {
            return;
        }
        let mut paths = self.search_paths.clone();
        if let Some(dir) = &self.current_preset_dir {
            paths.push(dir.clone());
        }
        self.scanned_files = scan_texture_files(&paths);
        self.files_scanned = true;
        debug!(files = self.scanned_files.len(), "scanned texture paths");
    }

    unsafe fn sampler_for(
        &mut self,
        gl: &glow::Context,
        wrap: WrapMode,
        filter: FilterMode,
    ) -> glow::NativeSampler {
        if let Some(sampler) = self.samplers.get(&(wrap, filter)) {
            return *sampler;
        }
        let sampler = sampler::create_sampler(gl, wrap, filter).expect("sampler creation");
        self.samplers.insert((wrap, filter), sampler);
        sampler
    }

    unsafe fn placeholder(&mut self, gl: &glow::Context) -> glow::NativeTexture {
        if let Some(placeholder) = &self.placeholder {
            return placeholder.handle;
        }
        let mut texture = Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)
            .expect("placeholder allocation");
        texture.upload_rgba8(gl, 1, 1, &[0, 0, 0, 255]);
        let handle = texture.handle;
        self.placeholder = Some(texture);
        handle
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        for (_, texture) in self.textures.drain() {
            texture.destroy(gl);
        }
        if let Some(placeholder) = self.placeholder.take() {
            placeholder.destroy(gl);
        }
        for (_, sampler) in self.samplers.drain() {
            gl.delete_sampler(sampler);
        }
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("kaleid_tex_{name}_{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Minimal valid 1x1 24-bit BMP.
    fn tiny_bmp() -> Vec<u8> {
        let mut bmp = Vec::new();
        bmp.extend_from_slice(b"BM");
        bmp.extend_from_slice(&58u32.to_le_bytes()); // file size
        bmp.extend_from_slice(&0u32.to_le_bytes());
        bmp.extend_from_slice(&54u32.to_le_bytes()); // pixel offset
        bmp.extend_from_slice(&40u32.to_le_bytes()); // header size
        bmp.extend_from_slice(&1i32.to_le_bytes()); // width
        bmp.extend_from_slice(&1i32.to_le_bytes()); // height
        bmp.extend_from_slice(&1u16.to_le_bytes()); // planes
        bmp.extend_from_slice(&24u16.to_le_bytes()); // bpp
        bmp.extend_from_slice(&[0u8; 24]); // compression..palette
        bmp.extend_from_slice(&[0x40, 0x80, 0xC0, 0x00]); // one padded pixel
        bmp
    }

    #[test]
    fn scan_finds_recognized_extensions_recursively() {
        let dir = temp_dir("scan");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("Rock.bmp"), tiny_bmp()).unwrap();
        fs::write(dir.join("sub").join("tile.jpg"), b"not-a-real-jpg").unwrap();
        fs::write(dir.join("notes.txt"), b"skip me").unwrap();

        let mut found = scan_texture_files(&[dir.clone()]);
        found.sort_by(|a, b| a.lower_base_name.cmp(&b.lower_base_name));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].lower_base_name, "rock");
        assert_eq!(found[1].lower_base_name, "tile");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn preloader_stages_decodable_files_and_skips_builtins() {
        let dir = temp_dir("preload");
        fs::write(dir.join("granite.bmp"), tiny_bmp()).unwrap();

        let preloader = TexturePreloader::new(vec![dir.clone()]);
        let names: HashSet<String> = ["granite", "main", "blur2", "noise_lq", "rand00_x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        preloader.preload_for_samplers(&names);

        assert_eq!(preloader.staged_count(), 1);
        let staged = preloader.take("granite").expect("granite staged");
        assert_eq!((staged.width, staged.height), (1, 1));
        assert_eq!(staged.rgba.len(), 4);
        // take() removes the entry.
        assert!(preloader.take("granite").is_none());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn preloader_resolves_qualified_sampler_names() {
        let dir = temp_dir("preload_prefix");
        fs::write(dir.join("marble.bmp"), tiny_bmp()).unwrap();

        let preloader = TexturePreloader::new(vec![dir.clone()]);
        let names: HashSet<String> = [String::from("pc_marble")].into_iter().collect();
        preloader.preload_for_samplers(&names);

        assert!(preloader.take("marble").is_some());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn undecodable_files_are_not_staged() {
        let dir = temp_dir("baddecode");
        fs::write(dir.join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let preloader = TexturePreloader::new(vec![dir.clone()]);
        let names: HashSet<String> = [String::from("broken")].into_iter().collect();
        preloader.preload_for_samplers(&names);

        assert_eq!(preloader.staged_count(), 0);

        let _ = fs::remove_dir_all(dir);
    }
}
