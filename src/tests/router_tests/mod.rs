mod lookup_tests;
mod map_tests;
mod marker_tests;
