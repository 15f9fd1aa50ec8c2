use pretty_assertions::assert_eq;
use robolink_core::link::{CommandError, DriveCommand, Keyframe, KeyframeSet};

const FILE: &str = "500,90,45,0\n250,10\n1000,1,2,3,4,5\n\n999,9\n";

#[test]
fn test_parse_file_stops_at_blank_line() {
    let set = KeyframeSet::parse(FILE, 3).unwrap();
    assert_eq!(
        set.frames,
        vec![
            Keyframe::new(500, vec![90, 45, 0]),
            Keyframe::new(250, vec![10, 0, 0]),
            Keyframe::new(1000, vec![1, 2, 3]),
        ]
    );
    assert_eq!(set.to_text(), "500,90,45,0\n250,10,0,0\n1000,1,2,3\n");
}

#[test]
fn test_playback_commands() {
    let set = KeyframeSet::parse("100,1,2\n200,3,4\n", 2).unwrap();
    let wire: Vec<String> = set.commands().iter().map(|c| c.to_string()).collect();
    assert_eq!(wire, vec!["k,100,1,2", "k,200,3,4"]);
    assert_eq!(
        set.frames[0].to_command(0),
        DriveCommand::Keyframe(Keyframe::new(0, vec![1, 2]))
    );
}

#[test]
fn test_rejects_bad_characters() {
    assert!(matches!(
        KeyframeSet::parse("100,1,2\n1x0,3\n", 2),
        Err(CommandError::InvalidFormat(_))
    ));
    assert!(matches!(
        Keyframe::parse_line("-5,1", 2),
        Err(CommandError::InvalidFormat(_))
    ));
}

#[test]
fn test_rejects_missing_time() {
    assert!(matches!(
        Keyframe::parse_line(",1,2", 2),
        Err(CommandError::InvalidNumber { .. })
    ));
}

#[test]
fn test_wire_keyframe_parses_back() {
    let cmd: DriveCommand = "k,300,5,6,7".parse().unwrap();
    assert_eq!(cmd, DriveCommand::Keyframe(Keyframe::new(300, vec![5, 6, 7])));
    assert!(matches!(
        "k,300,five".parse::<DriveCommand>(),
        Err(CommandError::InvalidNumber { .. })
    ));
}
