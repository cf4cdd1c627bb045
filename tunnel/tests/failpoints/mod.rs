mod writer_test;
