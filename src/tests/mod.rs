mod support;

mod api_tests;
