mod proptest_rom;
