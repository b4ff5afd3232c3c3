use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*;
use std::path::{PathBuf,Path};
use std::process::Command; // Run programs
use tempfile;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

// Write some text that repeats enough to force dictionary resets.
fn make_text(temp_dir: &tempfile::TempDir,lines: usize) -> Result<PathBuf,Box<dyn std::error::Error>> {
    let mut txt = String::new();
    for i in 0..lines {
        txt += &format!("line {} of {}: to be or not to be, that is the question {}\r\n",i,lines,i*i % 97);
    }
    let txt_path = temp_dir.path().join("source.txt");
    std::fs::write(&txt_path,txt)?;
    Ok(txt_path)
}

fn run(args: &[&str],in_path: &Path,out_path: &Path) -> STDRESULT {
    let mut cmd = Command::cargo_bin("lzwpack")?;
    cmd.args(args)
        .arg("-i").arg(in_path)
        .arg("-o").arg(out_path)
        .assert()
        .success();
    Ok(())
}

fn round_trip_test(coding_args: &[&str]) -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = make_text(&temp_dir,3000)?;
    let cmp_path = temp_dir.path().join("source.lzw");
    let out_path = temp_dir.path().join("expanded.txt");
    run(&[&["compress"],coding_args].concat(),&in_path,&cmp_path)?;
    run(&[&["expand"],coding_args].concat(),&cmp_path,&out_path)?;
    match (std::fs::read(in_path),std::fs::read(cmp_path),std::fs::read(out_path)) {
        (Ok(v1),Ok(c),Ok(v2)) => {
            assert!(c.len() < v1.len() / 2);
            assert_eq!(v1,v2);
        },
        _ => panic!("unable to compare output with reference")
    }
    Ok(())
}

#[test]
fn default_round_trip() -> STDRESULT {
    round_trip_test(&[])
}

#[test]
fn width_round_trip() -> STDRESULT {
    round_trip_test(&["-b","10"])?;
    round_trip_test(&["-b","15"])
}

#[test]
fn size_round_trip() -> STDRESULT {
    round_trip_test(&["-b","13","-s","5000"])
}

#[test]
fn known_compression() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("tobe.txt");
    let out_path = temp_dir.path().join("tobe.lzw");
    std::fs::write(&in_path,"TOBEORNOTTOBEORTOBEORNOT#\n")?;
    run(&["compress"],&in_path,&out_path)?;
    let expected = "54 F0 04 42 50 04 4F 20 05 4E F0 04 54 10 10 03 51 10 0A 41 10 06 81 10 23 A0 00 00 01";
    assert_eq!(std::fs::read(out_path)?,hex::decode(expected.replace(" ",""))?);
    Ok(())
}

#[test]
fn dump_codes() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("tobe.txt");
    let out_path = temp_dir.path().join("tobe.lzw");
    std::fs::write(&in_path,"TOBEORNOTTOBEORTOBEORNOT#\n")?;
    run(&["compress","-b","9","-s","4096"],&in_path,&out_path)?;
    let mut cmd = Command::cargo_bin("lzwpack")?;
    cmd.arg("dump").arg("-b").arg("9").arg("-i").arg(&out_path)
        .assert()
        .success()
        .stdout("054 04f 042 045 04f 052 04e 04f 054 101 103 105 10a 104 106 108\n023 00a 100\n")
        .stderr(predicate::str::contains("19 codes"));
    Ok(())
}

#[test]
fn bad_width_rejected() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = make_text(&temp_dir,10)?;
    let mut cmd = Command::cargo_bin("lzwpack")?;
    cmd.arg("compress").arg("-b").arg("16")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(temp_dir.path().join("out.lzw"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("9..=15"));
    Ok(())
}

#[test]
fn small_dictionary_rejected() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = make_text(&temp_dir,10)?;
    let out_path = temp_dir.path().join("out.lzw");
    let mut cmd = Command::cargo_bin("lzwpack")?;
    cmd.arg("compress").arg("-s").arg("200")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&out_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("DictionaryTooSmall"));
    assert!(!out_path.exists());
    Ok(())
}

#[test]
fn missing_input() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("lzwpack")?;
    cmd.arg("expand")
        .arg("-i").arg(temp_dir.path().join("absent.lzw"))
        .arg("-o").arg(temp_dir.path().join("out.txt"))
        .assert()
        .failure();
    Ok(())
}
