mod interactive_session_test;
mod read_splits_test;
mod write_commit_test;
