use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bigpack_archive::format::FILE_DATA_HEADER_SIZE;
use bigpack_archive::progress::{silent, Event, Severity};
use bigpack_archive::{
    Archive, ArchiveWriter, BuildOptions, BuildSummary, BuildTask, CompressionMethod, Encryption,
    Error, FileRule, ReadOptions, TocTask,
};
use bigpack_deflate::{compress_bound, PARTITION_THRESHOLD};

fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7) % 61) as u8 + b' ').collect()
}

fn build(root: &Path, task: &BuildTask, options: &BuildOptions) -> (PathBuf, BuildSummary) {
    let output = root.join(format!("{}.big", task.name));
    let summary = ArchiveWriter::new(options)
        .build(task, root, &output, silent)
        .unwrap();
    (output, summary)
}

/// `data/` with a nested folder, an empty file and a stored file.
fn sample_task(root: &Path) -> BuildTask {
    let data = root.join("data");
    let mut toc = TocTask::new("data", "data");
    toc.rules = vec![FileRule::overriding("*.bin", CompressionMethod::Uncompressed)];
    toc.files = vec![
        write_file(&data.join("readme.txt"), b"hello archive"),
        write_file(&data.join("art").join("ui").join("button.dds"), &pattern(50_000)),
        write_file(&data.join("art").join("raw.bin"), &pattern(3_000)),
        write_file(&data.join("empty.txt"), b""),
        write_file(&data.join("sound").join("theme.ogg"), &pattern(70_000)),
    ];
    BuildTask {
        name: "sample".into(),
        tocs: vec![toc],
    }
}

fn source(root: &Path, relative: &str) -> Vec<u8> {
    fs::read(root.join("data").join(relative)).unwrap()
}

#[test]
fn test_round_trip_extract() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, summary) = build(dir.path(), &task, &BuildOptions::default());
    assert_eq!(summary.files, 5);
    assert!(!summary.encrypted);

    let archive = Archive::open(&output).unwrap();
    assert_eq!(archive.name(), "sample");
    assert!(!archive.is_encrypted());

    let paths: Vec<String> = archive.files().iter().map(|f| f.path()).collect();
    assert_eq!(
        paths,
        [
            "empty.txt",
            "readme.txt",
            "art\\raw.bin",
            "art\\ui\\button.dds",
            "sound\\theme.ogg"
        ]
    );

    let out = dir.path().join("out");
    let mut steps = 0;
    let report = archive
        .extract(&out, |event: &Event| {
            if event.progress.is_some() {
                steps += 1;
            }
        })
        .unwrap();
    assert_eq!(report.written, 5);
    assert!(report.is_clean());
    assert_eq!(steps, 5);

    for relative in ["readme.txt", "empty.txt", "art/raw.bin", "art/ui/button.dds", "sound/theme.ogg"] {
        let extracted = fs::read(out.join("data").join(relative)).unwrap();
        assert_eq!(extracted, source(dir.path(), relative), "{relative}");
    }

    assert!(archive.test(silent).unwrap());
}

#[test]
fn test_methods_and_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());
    let archive = Archive::open(&output).unwrap();

    for file in archive.files() {
        let expected = match file.name {
            "empty.txt" | "raw.bin" => CompressionMethod::Uncompressed,
            _ => CompressionMethod::DecompressDuringRead,
        };
        assert_eq!(file.method(), expected, "{}", file.path());
    }

    let empty = archive.files().into_iter().find(|f| f.name == "empty.txt").unwrap();
    assert_eq!(empty.info.compressed_len.get(), 0);
    assert_eq!(empty.info.ratio(), 1.0);
    assert!(archive.read_file(empty.index).unwrap().is_empty());
}

#[test]
fn test_listing_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut toc = TocTask::new("data", "data");
    toc.files = vec![write_file(&dir.path().join("data").join("a.txt"), b"abcd")];
    let task = BuildTask {
        name: "tiny".into(),
        tocs: vec![toc],
    };
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let archive = Archive::open(&output).unwrap();
    let info = &archive.file_infos()[0];
    let compressed = info.compressed_len.get();
    assert!(compressed as usize <= compress_bound(4));
    assert_eq!(info.decompressed_len.get(), 4);

    let expected = format!(
        "TOCEntry\n  Name : 'data'\n  Alias: 'data'\n\n{:<72}{:>16}{:>16}{:>8}{:>16}\n{:<72}{:>16}{:>16}{:>8.3}{:>16}\n\n",
        "File Name",
        "Original Size",
        "Stored Size",
        "Ratio",
        "Storage Type",
        "  a.txt",
        4,
        compressed,
        compressed as f64 / 4.0,
        "Compress Stream"
    );
    assert_eq!(archive.listing(), expected);
    assert_eq!(archive.read_file(0).unwrap(), b"abcd");
}

#[test]
fn test_corrupted_payload_fails_test() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let position = {
        let archive = Archive::open(&output).unwrap();
        let raw = archive.files().into_iter().find(|f| f.name == "raw.bin").unwrap();
        archive.header().data_base() + raw.info.file_data_offset.get() as u64 + 10
    };

    let mut bytes = fs::read(&output).unwrap();
    bytes[position as usize] ^= 0xFF;
    fs::write(&output, &bytes).unwrap();

    let archive = Archive::open(&output).unwrap();
    let mut warnings = Vec::new();
    let passed = archive
        .test(|event: &Event| {
            if event.severity == Severity::Warn {
                warnings.push(event.message.clone().unwrap_or_default());
            }
        })
        .unwrap();
    assert!(!passed);
    assert_eq!(warnings, vec!["CRC mismatch: art\\raw.bin".to_string()]);

    let report = archive.extract(&dir.path().join("out"), silent).unwrap();
    assert_eq!(report.crc_mismatches, vec!["art\\raw.bin".to_string()]);
    assert_eq!(report.written, 5);
}

#[test]
fn test_broken_stream_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let (position, len) = {
        let archive = Archive::open(&output).unwrap();
        let file = archive.files().into_iter().find(|f| f.name == "theme.ogg").unwrap();
        (
            archive.header().data_base() + file.info.file_data_offset.get() as u64,
            file.info.compressed_len.get() as usize,
        )
    };

    let mut bytes = fs::read(&output).unwrap();
    for b in &mut bytes[position as usize..position as usize + len] {
        *b = 0xEE;
    }
    fs::write(&output, &bytes).unwrap();

    let archive = Archive::open(&output).unwrap();
    let report = archive.extract(&dir.path().join("out"), silent).unwrap();
    assert_eq!(report.failed, vec!["sound\\theme.ogg".to_string()]);
    assert_eq!(report.written, 4);
    assert!(!dir.path().join("out/data/sound/theme.ogg").exists());
    assert!(!archive.test(silent).unwrap());
}

#[test]
fn test_tamper_name_is_fatal_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut toc = TocTask::new("data", "data");
    toc.files = vec![
        write_file(&dir.path().join("data").join("_此处禁止通行"), b"nothing to see"),
        write_file(&dir.path().join("data").join("ok.txt"), b"fine"),
    ];
    let task = BuildTask {
        name: "trap".into(),
        tocs: vec![toc],
    };

    let mut errors = Vec::new();
    let output = dir.path().join("trap.big");
    ArchiveWriter::new(&BuildOptions::default())
        .build(&task, dir.path(), &output, |event: &Event| {
            if event.severity == Severity::Error {
                errors.push(event.message.clone().unwrap_or_default());
            }
        })
        .unwrap();
    assert_eq!(errors, vec!["Hello there!".to_string()]);

    let archive = Archive::open(&output).unwrap();
    let err = archive.extract(&dir.path().join("out"), silent).unwrap_err();
    assert!(matches!(err, Error::Fatal));
    assert_eq!(err.to_string(), "Fatal error.");
    assert!(matches!(archive.test(silent), Err(Error::Fatal)));
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .map(|entry| entry.unwrap().path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

#[test]
fn test_fatal_extract_stops_all_workers() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let mut toc = TocTask::new("data", "data");
    toc.files = vec![write_file(&data.join("_此处禁止通行"), b"nothing to see")];
    for i in 0..120 {
        let path = data.join("bulk").join(format!("file{i:03}.bin"));
        toc.files.push(write_file(&path, &pattern(64 * 1024 + i)));
    }
    let task = BuildTask {
        name: "stop".into(),
        tocs: vec![toc],
    };
    let options = BuildOptions {
        compress_level: 1,
        ..BuildOptions::default()
    };
    let (output, _) = build(dir.path(), &task, &options);

    let archive = Archive::open_with(&output, ReadOptions::default().with_threads(1)).unwrap();
    let out = dir.path().join("out");
    let err = archive.extract(&out, silent).unwrap_err();
    assert!(matches!(err, Error::Fatal));

    let at_return = count_files(&out);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(count_files(&out), at_return);
    assert!(at_return < 120);
}

#[test]
fn test_body_follows_index_order() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let huge = pattern(PARTITION_THRESHOLD + 345_678);
    let mut toc = TocTask::new("data", "data");
    toc.files = vec![write_file(&data.join("a_huge.bin"), &huge)];
    for i in 0..6 {
        let path = data.join(format!("b{i}.txt"));
        toc.files.push(write_file(&path, format!("small file {i}").as_bytes()));
    }
    let task = BuildTask {
        name: "order".into(),
        tocs: vec![toc],
    };
    let options = BuildOptions {
        compress_level: 1,
        threads: 4,
        ..BuildOptions::default()
    };
    let (output, _) = build(dir.path(), &task, &options);

    let archive = Archive::open(&output).unwrap();
    let files = archive.files();
    assert_eq!(files[0].path(), "a_huge.bin");
    assert_eq!(files.len(), 7);

    let infos = archive.file_infos();
    assert_eq!(infos[0].file_data_offset.get() as usize, FILE_DATA_HEADER_SIZE);
    for pair in infos.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert!(next.file_data_offset.get() > prev.file_data_offset.get());
        assert_eq!(
            next.file_data_offset.get() as usize,
            prev.file_data_offset.get() as usize
                + prev.compressed_len.get() as usize
                + FILE_DATA_HEADER_SIZE
        );
    }

    assert_eq!(archive.read_file(0).unwrap(), huge);
    assert_eq!(archive.read_file(6).unwrap(), b"small file 5");
}

#[test]
fn test_encrypted_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let key: Vec<u8> = (1..=64u8).collect();
    let options = BuildOptions {
        encryption: Encryption::Key(key),
        skip_tool_signature: false,
        threads: 3,
        ..BuildOptions::default()
    };
    let (output, summary) = build(dir.path(), &task, &options);
    assert!(summary.encrypted);

    let bytes = fs::read(&output).unwrap();
    assert!(!bytes.starts_with(b"_ARCHIVE"));

    let archive = Archive::open(&output).unwrap();
    assert!(archive.is_encrypted());
    assert_eq!(archive.name(), "sample");
    assert_eq!(archive.files().len(), 5);
    assert!(archive.test(silent).unwrap());

    let readme = archive.files().into_iter().find(|f| f.name == "readme.txt").unwrap();
    assert_eq!(archive.read_file(readme.index).unwrap(), b"hello archive");

    let check = archive.verify_signatures().unwrap();
    assert!(check.archive);
    assert_eq!(check.tool, Some(true));
    assert_eq!(archive.header().archive_signature, summary.archive_signature);
}

#[test]
fn test_generated_key_archive_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let options = BuildOptions {
        encryption: Encryption::Generated { seed: Some(42) },
        ..BuildOptions::default()
    };
    let (output, summary) = build(dir.path(), &task, &options);
    assert!(summary.encrypted);

    assert!(matches!(Archive::open(&output), Err(Error::Fatal)));
}

#[test]
fn test_plain_signatures() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());

    let (output, _) = build(dir.path(), &task, &BuildOptions::default());
    let check = Archive::open(&output).unwrap().verify_signatures().unwrap();
    assert!(check.archive);
    assert_eq!(check.tool, None);

    let options = BuildOptions {
        skip_tool_signature: false,
        ..BuildOptions::default()
    };
    let (output, summary) = build(dir.path(), &task, &options);
    let archive = Archive::open(&output).unwrap();
    assert_eq!(archive.tool_signature().unwrap(), summary.tool_signature.unwrap());
    assert_eq!(
        archive.verify_signatures().unwrap(),
        bigpack_archive::SignatureCheck {
            archive: true,
            tool: Some(true)
        }
    );
}

#[test]
fn test_rules_and_ignore_list() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");

    let mut toc = TocTask::new("data", "data");
    toc.rules = vec![
        FileRule::skipping("*.log"),
        FileRule::overriding("*.wav", CompressionMethod::Uncompressed),
        FileRule::overriding("*.dat", CompressionMethod::DecompressAllAtOnce)
            .with_size_range(Some(100), None),
    ];
    toc.files = vec![
        write_file(&data.join("keep.txt"), b"keep me keep me"),
        write_file(&data.join("debug.log"), b"noise"),
        write_file(&data.join("click.wav"), &pattern(500)),
        write_file(&data.join("big.dat"), &pattern(400)),
        write_file(&data.join("small.dat"), &pattern(10)),
        write_file(&data.join("scratch.tmp"), b"temp"),
        write_file(&data.join("cache").join("blob.txt"), b"cached"),
    ];
    let task = BuildTask {
        name: "rules".into(),
        tocs: vec![toc],
    };
    let options = BuildOptions {
        ignore_list: vec!["cache/".into(), "*.tmp".into()],
        ..BuildOptions::default()
    };
    let (output, summary) = build(dir.path(), &task, &options);
    assert_eq!(summary.skipped, 3);

    let archive = Archive::open(&output).unwrap();
    let methods: Vec<(String, CompressionMethod)> = archive
        .files()
        .iter()
        .map(|f| (f.path(), f.method()))
        .collect();
    assert_eq!(
        methods,
        vec![
            ("big.dat".to_string(), CompressionMethod::DecompressAllAtOnce),
            ("click.wav".to_string(), CompressionMethod::Uncompressed),
            ("keep.txt".to_string(), CompressionMethod::DecompressDuringRead),
            ("small.dat".to_string(), CompressionMethod::DecompressDuringRead),
        ]
    );
    assert!(archive.test(silent).unwrap());
}

#[test]
fn test_multiple_tocs() {
    let dir = tempfile::tempdir().unwrap();

    let mut music = TocTask::new("Music", "music");
    music.alias = "Tracks".into();
    music.files = vec![write_file(&dir.path().join("music").join("a.ogg"), &pattern(900))];
    let mut voice = TocTask::new("Voice", "voice");
    voice.files = vec![
        write_file(&dir.path().join("voice").join("en").join("hi.wav"), &pattern(300)),
        write_file(&dir.path().join("voice").join("de").join("hallo.wav"), &pattern(200)),
    ];
    let task = BuildTask {
        name: "Audio".into(),
        tocs: vec![music, voice],
    };
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let archive = Archive::open(&output).unwrap();
    assert_eq!(archive.name(), "audio");
    assert_eq!(archive.tocs().len(), 2);
    assert_eq!(archive.tocs()[0].name(), "music");
    assert_eq!(archive.tocs()[0].alias(), "tracks");

    let voice: Vec<String> = archive.toc_files(1).iter().map(|f| f.path()).collect();
    assert_eq!(voice, ["de\\hallo.wav", "en\\hi.wav"]);

    let out = dir.path().join("out");
    archive.extract(&out, silent).unwrap();
    assert_eq!(fs::read(out.join("music/a.ogg")).unwrap(), pattern(900));
    assert_eq!(fs::read(out.join("voice/en/hi.wav")).unwrap(), pattern(300));
}

#[test]
fn test_file_tree_json() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let tree = Archive::open(&output).unwrap().file_tree().unwrap();
    assert_eq!(tree.file_count(), 5);

    let value: serde_json::Value = serde_json::from_str(&tree.to_json_pretty().unwrap()).unwrap();
    assert_eq!(value["name"], "sample");
    let toc = &value["tocs"][0];
    assert_eq!(toc["name"], "data");
    assert_eq!(toc["tocfolder"]["path"], "");
    assert_eq!(toc["tocfolder"]["files"][0]["name"], "empty.txt");
    assert_eq!(toc["tocfolder"]["files"][0]["storage"], "store");
    assert_eq!(toc["tocfolder"]["subfolders"][0]["path"], "art");
    assert_eq!(
        toc["tocfolder"]["subfolders"][0]["subfolders"][0]["files"][0]["decompressedlen"],
        50_000
    );
}

#[test]
fn test_large_file_uses_partitioned_stream() {
    let dir = tempfile::tempdir().unwrap();
    let contents = pattern(PARTITION_THRESHOLD + 1_234_567);
    let mut toc = TocTask::new("data", "data");
    toc.files = vec![write_file(&dir.path().join("data").join("huge.bin"), &contents)];
    let task = BuildTask {
        name: "huge".into(),
        tocs: vec![toc],
    };
    let options = BuildOptions {
        compress_level: 1,
        threads: 4,
        ..BuildOptions::default()
    };
    let (output, _) = build(dir.path(), &task, &options);

    let archive = Archive::open_with(&output, ReadOptions::default().with_threads(2)).unwrap();
    assert!(archive.file_infos()[0].compressed_len.get() < contents.len() as u32);
    assert_eq!(archive.read_file(0).unwrap(), contents);
    assert!(archive.test(silent).unwrap());
}

#[test]
fn test_truncated_archive_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let task = sample_task(dir.path());
    let (output, _) = build(dir.path(), &task, &BuildOptions::default());

    let bytes = fs::read(&output).unwrap();
    fs::write(&output, &bytes[..bytes.len() - 100]).unwrap();
    assert!(matches!(Archive::open(&output), Err(Error::Format(_))));
}
