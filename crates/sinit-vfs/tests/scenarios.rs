//! End-to-end scenarios through the public `Vfs` API.
//!
//! Each test builds a VFS the way a loader would (initiators, then
//! mounts) and drives it only through caller path strings.

use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use sinit_vfs::drivers::uefi::MemoryFileSystem;
use sinit_vfs::{
    AssetTable, Initiator, MountOptions, MountRoot, OpenFlags, Platform, TemplateVars, Vfs,
    VfsError, VolumeState,
};

static SPLASH: [u8; 1024] = {
    let mut data = [0u8; 1024];
    let mut i = 0;
    while i < data.len() {
        data[i] = (i % 251) as u8;
        i += 1;
    }
    data
};

// ============================================================================
// Shared setup
// ============================================================================

fn firmware() -> Vfs {
    let vfs = Vfs::init(Platform::Firmware).unwrap();
    let table = AssetTable::from_static(&[("splash.png", &SPLASH[..]), ("fonts/term.psf", &b"PSF2"[..])])
        .unwrap();
    vfs.mount("res", "assets", MountRoot::Assets(Arc::new(table)), MountOptions::new())
        .unwrap();
    vfs
}

fn ramdisk() -> MountRoot {
    MountRoot::Protocol(Arc::new(MemoryFileSystem::new()))
}

// ============================================================================
// Assets
// ============================================================================

#[test]
fn splash_from_assets() {
    let vfs = firmware();
    let mut file = vfs.open("res:///splash.png", OpenFlags::read()).unwrap();
    assert_eq!(file.size().unwrap(), 1024);

    let mut buf = vec![0u8; 600];
    assert_eq!(file.read(&mut buf).unwrap(), 600);
    assert_eq!(&buf[..], &SPLASH[..600]);
    assert_eq!(file.read(&mut buf).unwrap(), 424);
    assert_eq!(&buf[..424], &SPLASH[600..]);
    assert_eq!(file.read(&mut buf).unwrap(), 0);

    assert_eq!(file.seek(SeekFrom::End(-24)).unwrap(), 1000);
    assert_eq!(file.read(&mut buf).unwrap(), 24);
    assert_eq!(file.seek(SeekFrom::Start(4096)).unwrap(), 4096);
    assert_eq!(file.read(&mut buf).unwrap(), 0);
    file.close().unwrap();

    assert_eq!(vfs.stat("res://splash.png").unwrap().size, 1024);
    let names: Vec<_> = vfs.list("res:///").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["fonts", "splash.png"]);
}

#[test]
fn read_only_volume_rejects_without_side_effects() {
    let vfs = firmware();
    assert!(matches!(
        vfs.write_all("res:///splash.png", b"overwritten"),
        Err(VfsError::ReadOnly(_))
    ));
    assert!(matches!(vfs.rename("res:///splash.png", "res:///x.png"), Err(VfsError::ReadOnly(_))));
    assert_eq!(vfs.read_all("res:///splash.png").unwrap(), SPLASH);
    assert_eq!(vfs.volume("res").unwrap().open_handles(), 0);
}

// ============================================================================
// Host directories
// ============================================================================

#[cfg(unix)]
#[test]
fn posix_directory_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let vfs = Vfs::init(Platform::Hosted).unwrap();
    vfs.mount(
        "/var",
        "posix",
        MountRoot::Directory(dir.path().to_path_buf()),
        MountOptions::new(),
    )
    .unwrap();

    vfs.mkdir("/var/log").unwrap();
    assert!(matches!(vfs.mkdir("/var/log"), Err(VfsError::AlreadyExists(_))));
    vfs.write_all("/var/log/boot.log", b"stage1 ok\n").unwrap();
    assert!(dir.path().join("log/boot.log").is_file());

    let entries = vfs.list("/var/log").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "boot.log");
    assert!(entries[0].kind.is_file());

    assert!(matches!(vfs.delete("/var/log"), Err(VfsError::Busy(_))));
    vfs.delete("/var/log/boot.log").unwrap();
    vfs.delete("/var/log").unwrap();
    assert!(!vfs.exists("/var/log").unwrap());
    assert!(vfs.statfs("/var").unwrap().bsize > 0);
}

// ============================================================================
// Mount lifecycle
// ============================================================================

#[test]
fn unmount_busy_then_forced() {
    let vfs = firmware();
    vfs.mount("/boot", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.write_all("/boot/vmlinuz", b"kernel").unwrap();

    let mut file = vfs.open("/boot/vmlinuz", OpenFlags::read()).unwrap();
    assert!(matches!(vfs.unmount("/boot", false), Err(VfsError::Busy(_))));
    assert_eq!(vfs.volume_state("/boot"), VolumeState::Mounted);

    let mut buf = [0u8; 3];
    assert_eq!(file.read(&mut buf).unwrap(), 3);

    vfs.unmount("/boot", true).unwrap();
    assert_eq!(vfs.volume_state("/boot"), VolumeState::Unmounted);
    assert!(matches!(file.read(&mut buf), Err(VfsError::InvalidHandle)));
    assert!(matches!(file.seek(SeekFrom::Start(0)), Err(VfsError::InvalidHandle)));
    assert!(matches!(file.tell(), Err(VfsError::InvalidHandle)));
    assert!(matches!(file.close(), Err(VfsError::InvalidHandle)));
    assert!(matches!(file.close(), Err(VfsError::InvalidHandle)));
}

#[test]
fn mount_unmount_round_trip() {
    let vfs = firmware();
    let before = (vfs.volume_names(), vfs.driver_names());

    vfs.mount("/scratch", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.write_all("/scratch/a", b"1").unwrap();
    vfs.unmount("/scratch", false).unwrap();

    assert_eq!((vfs.volume_names(), vfs.driver_names()), before);

    // A remount gets a fresh driver context.
    vfs.mount("/scratch", "uefi", ramdisk(), MountOptions::new()).unwrap();
    assert!(!vfs.exists("/scratch/a").unwrap());
}

#[test]
fn dropped_handle_releases_volume() {
    let vfs = firmware();
    vfs.mount("/boot", "uefi", ramdisk(), MountOptions::new()).unwrap();
    {
        let mut file = vfs.open("/boot/log", OpenFlags::create()).unwrap();
        file.write_all(b"x").unwrap();
        assert_eq!(vfs.volume("/boot").unwrap().open_handles(), 1);
    }
    assert_eq!(vfs.volume("/boot").unwrap().open_handles(), 0);
    vfs.unmount("/boot", false).unwrap();
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn resolution_is_order_independent() {
    for reversed in [false, true] {
        let vfs = firmware();
        let mut names = vec!["/", "/boot", "/boot/efi"];
        if reversed {
            names.reverse();
        }
        for name in names {
            vfs.mount(name, "uefi", ramdisk(), MountOptions::new()).unwrap();
        }

        let cases = [
            ("/boot/efi/EFI/BOOT/BOOTX64.EFI", "/boot/efi", "/EFI/BOOT/BOOTX64.EFI"),
            ("/boot/efi", "/boot/efi", "/"),
            ("/boot/grub/grub.cfg", "/boot", "/grub/grub.cfg"),
            ("/bootloader", "/", "/bootloader"),
            ("/boot/../etc/fstab", "/", "/etc/fstab"),
            ("res://fonts//term.psf", "res", "/fonts/term.psf"),
        ];
        for (input, volume, path) in cases {
            let (v, p) = vfs.resolve(input).unwrap();
            assert_eq!((v.name(), p.to_string().as_str()), (volume, path), "{input}");
        }
    }
}

#[test]
fn default_volume_catches_unclaimed_paths() {
    let vfs = firmware();
    vfs.mount("esp", "uefi", ramdisk(), MountOptions::new()).unwrap();
    assert!(matches!(vfs.stat("/loader.conf"), Err(VfsError::NoSuchVolume(_))));

    vfs.set_default_volume(Some("esp")).unwrap();
    vfs.write_all("/loader.conf", b"timeout 0").unwrap();
    assert_eq!(vfs.read_all("esp://loader.conf").unwrap(), b"timeout 0");
}

// ============================================================================
// Layer volumes
// ============================================================================

#[test]
fn overlay_over_assets() {
    let vfs = firmware();
    vfs.mount("ram", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.mount(
        "/",
        "overlay",
        MountRoot::Layers {
            upper: "ram".into(),
            lower: "res".into(),
        },
        MountOptions::new(),
    )
    .unwrap();

    // Lower shows through, upper wins once written.
    assert_eq!(vfs.read_all("/fonts/term.psf").unwrap(), b"PSF2");
    vfs.write_all("/fonts/term.psf", b"PSF2 patched").unwrap();
    assert_eq!(vfs.read_all("/fonts/term.psf").unwrap(), b"PSF2 patched");
    assert_eq!(vfs.read_all("res://fonts/term.psf").unwrap(), b"PSF2");

    vfs.delete("/splash.png").unwrap();
    assert!(!vfs.exists("/splash.png").unwrap());
    assert!(vfs.exists("res://splash.png").unwrap());
    let names: Vec<_> = vfs.list("/").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["fonts"]);

    assert!(matches!(vfs.unmount("res", false), Err(VfsError::Busy(_))));
    assert!(matches!(vfs.unmount("ram", false), Err(VfsError::Busy(_))));
}

#[test]
fn overlay_copy_up_keeps_lower_pinned() {
    let vfs = firmware();
    vfs.mount("ram", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.mount(
        "/",
        "overlay",
        MountRoot::Layers {
            upper: "ram".into(),
            lower: "res".into(),
        },
        MountOptions::new(),
    )
    .unwrap();

    let mut file = vfs.open("/fonts/term.psf", OpenFlags::write()).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    file.write_all(b"+").unwrap();
    file.close().unwrap();

    assert_eq!(vfs.read_all("ram://fonts/term.psf").unwrap(), b"PSF2+");
    assert_eq!(vfs.volume("res").unwrap().pins(), 1);
    vfs.unmount("/", false).unwrap();
    assert_eq!(vfs.volume("res").unwrap().pins(), 0);
    vfs.unmount("res", false).unwrap();
}

#[test]
fn template_follows_variables() {
    let vfs = firmware();
    vfs.mount("/boot", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.mkdir("/boot/linux").unwrap();
    vfs.mkdir("/boot/rescue").unwrap();
    vfs.write_all("/boot/linux/cmdline", b"quiet").unwrap();
    vfs.write_all("/boot/rescue/cmdline", b"single").unwrap();

    let vars = TemplateVars::new();
    vfs.mount(
        "entry",
        "template",
        MountRoot::Wrap {
            volume: "/boot".into(),
        },
        MountOptions::new().with_variables(vars.clone()),
    )
    .unwrap();

    match vfs.read_all("entry:///${name}/cmdline") {
        Err(VfsError::UndefinedVariable(name)) => assert_eq!(name, "name"),
        other => panic!("expected UndefinedVariable, got {other:?}"),
    }
    vars.set("name", "linux");
    assert_eq!(vfs.read_all("entry:///${name}/cmdline").unwrap(), b"quiet");
    vars.set("name", "rescue");
    assert_eq!(vfs.read_all("entry:///${name}/cmdline").unwrap(), b"single");
}

#[cfg(feature = "zip")]
#[test]
fn archive_mount() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("modules/virtio.ko", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(&[7u8; 4000]).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let vfs = firmware();
    vfs.mount("initrd", "zip", MountRoot::Archive(bytes.into()), MountOptions::new())
        .unwrap();
    assert_eq!(vfs.stat("initrd://modules/virtio.ko").unwrap().size, 4000);
    assert_eq!(vfs.read_all("initrd://modules/virtio.ko").unwrap(), vec![7u8; 4000]);
    assert!(vfs.stat("initrd://modules").unwrap().is_dir());
    assert!(matches!(vfs.mkdir("initrd://lib"), Err(VfsError::ReadOnly(_))));
}

// ============================================================================
// Initiators
// ============================================================================

static CALLS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record(name: &str, deinit: bool) {
    let verb = if deinit { "deinit" } else { "init" };
    CALLS.lock().unwrap().push(format!("{verb} {name}"));
}

fn first(_vfs: &Vfs, deinit: bool) -> sinit_vfs::VfsResult<()> {
    record("first", deinit);
    Ok(())
}

fn second(_vfs: &Vfs, deinit: bool) -> sinit_vfs::VfsResult<()> {
    record("second", deinit);
    Ok(())
}

fn broken(_vfs: &Vfs, deinit: bool) -> sinit_vfs::VfsResult<()> {
    record("broken", deinit);
    Err(VfsError::OutOfMemory)
}

#[test]
fn partial_init_rolls_back_in_reverse() {
    let initiators: Vec<Initiator> = vec![first as Initiator, second, broken, first];
    let result = Vfs::with_initiators(initiators);
    assert!(matches!(result, Err(VfsError::OutOfMemory)));
    assert_eq!(
        *CALLS.lock().unwrap(),
        vec!["init first", "init second", "init broken", "deinit second", "deinit first"]
    );
}

#[test]
fn shutdown_unmounts_everything() {
    let vfs = firmware();
    vfs.mount("ram", "uefi", ramdisk(), MountOptions::new()).unwrap();
    vfs.mount(
        "/",
        "overlay",
        MountRoot::Layers {
            upper: "ram".into(),
            lower: "res".into(),
        },
        MountOptions::new(),
    )
    .unwrap();
    let mut file = vfs.open("/fonts/term.psf", OpenFlags::read()).unwrap();

    vfs.shutdown();
    assert!(vfs.volume_names().is_empty());
    assert!(vfs.driver_names().is_empty());
    let mut buf = [0u8; 4];
    assert!(matches!(file.read(&mut buf), Err(VfsError::InvalidHandle)));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_io_and_mounts() {
    let vfs = firmware();
    vfs.mount("/data", "uefi", ramdisk(), MountOptions::new()).unwrap();

    std::thread::scope(|s| {
        for t in 0..8 {
            let vfs = &vfs;
            s.spawn(move || {
                for i in 0..50 {
                    let path = format!("/data/t{t}-{i}");
                    let body = format!("thread {t} item {i}");
                    vfs.write_all(&path, body.as_bytes()).unwrap();
                    assert_eq!(vfs.read_all(&path).unwrap(), body.as_bytes());
                    assert_eq!(vfs.read_all("res:///splash.png").unwrap().len(), 1024);
                }
            });
        }
        for t in 0..2 {
            let vfs = &vfs;
            s.spawn(move || {
                for i in 0..50 {
                    let name = format!("/tmp{t}");
                    vfs.mount(&name, "uefi", ramdisk(), MountOptions::new()).unwrap();
                    vfs.write_all(&format!("{name}/f{i}"), b"x").unwrap();
                    vfs.unmount(&name, false).unwrap();
                }
            });
        }
    });

    assert_eq!(vfs.list("/data").unwrap().len(), 400);
    assert_eq!(vfs.volume_names(), vec!["/data".to_string(), "res".to_string()]);
}
