mod service;
mod support;
mod web;
