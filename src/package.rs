use anyhow::{Context, Result, anyhow};
use std::io::prelude::*;

/// Firmware components of a DFU zip package, as named in manifest.json
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Component {
    Application,
    Bootloader,
    SoftDevice,
    SoftDeviceBootloader,
}

impl Component {
    fn manifest_key(self) -> &'static str {
        match self {
            Component::Application => "application",
            Component::Bootloader => "bootloader",
            Component::SoftDevice => "softdevice",
            Component::SoftDeviceBootloader => "softdevice_bootloader",
        }
    }
}

/// Init packet and firmware image of one component
#[derive(Debug)]
pub struct Images {
    pub init_pkt: Vec<u8>,
    pub fw_pkt: Vec<u8>,
}

pub fn extract(path: &str, component: Component) -> Result<Images> {
    let reader = std::fs::File::open(path).with_context(|| format!("cannot open `{}`", path))?;
    extract_from(reader, component)
}

fn extract_from<R: Read + Seek>(reader: R, component: Component) -> Result<Images> {
    let mut zip = zip::ZipArchive::new(reader)?;

    let manifest_raw = zip
        .by_name("manifest.json")
        .context("DFU package: missing manifest.json")?;
    let manifest: serde_json::Value = serde_json::from_reader(manifest_raw)?;

    let key = component.manifest_key();
    let init_pkt = extract_part(&mut zip, &manifest, key, "dat_file")?;
    let fw_pkt = extract_part(&mut zip, &manifest, key, "bin_file")?;

    Ok(Images { init_pkt, fw_pkt })
}

fn extract_part<R: Read + Seek>(
    zip: &mut zip::ZipArchive<R>,
    manifest: &serde_json::Value,
    component: &str,
    part: &str,
) -> Result<Vec<u8>> {
    let comp = &manifest["manifest"][component];
    anyhow::ensure!(comp.is_object(), "DFU package: missing component `{}`", component);
    let part_name = comp[part].as_str().ok_or(anyhow!("DFU package: invalid manifest"))?;

    let mut reader = zip.by_name(part_name).context("invalid DFU package")?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    Ok(data)
}
